use thiserror::Error;

use crate::decode;

/// Upper bound on vCPUs per VM.
pub const MAX_CPUS: usize = 64;

/// Default synchronization backdoor: `or r0, r0, r0` with a bit set in the reserved low half of
/// the type-A encoding, so it never decodes as a regular instruction.
pub const DEFAULT_SYNC_BACKDOOR_WORD: u32 = 0x8000_0400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of vCPUs. All of them share guest RAM and the translation cache.
    pub cpu_count: usize,
    /// Guest-physical (and virtual; there is no MMU) base address of RAM.
    pub ram_base: u32,
    /// RAM size in bytes. Must be a non-zero multiple of 4.
    pub ram_size: u32,
    /// Maximum number of guest instructions per translated block.
    pub max_block_insns: usize,
    /// The whole cache is flushed when it would grow beyond this many blocks.
    pub max_cached_blocks: usize,
    /// Instruction word that triggers a sync-backdoor exit.
    pub sync_backdoor_word: u32,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            cpu_count: 1,
            ram_base: 0,
            ram_size: 64 * 1024,
            max_block_insns: 32,
            max_cached_blocks: 4096,
            sync_backdoor_word: DEFAULT_SYNC_BACKDOOR_WORD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cpu_count must be between 1 and {MAX_CPUS} (got {0})")]
    InvalidCpuCount(usize),
    #[error("RAM size {0:#x} is not a non-zero multiple of 4")]
    InvalidRamSize(u32),
    #[error("RAM at {base:#x} with size {size:#x} overflows the 32-bit address space")]
    RamOutOfRange { base: u32, size: u32 },
    #[error("RAM base {0:#x} is not 4-byte aligned")]
    MisalignedRamBase(u32),
    #[error("max_block_insns must be non-zero")]
    ZeroBlockLength,
    #[error("max_cached_blocks must be non-zero")]
    ZeroCacheCapacity,
    #[error("sync backdoor word {0:#010x} decodes as a regular instruction")]
    BackdoorCollides(u32),
}

impl VmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_count == 0 || self.cpu_count > MAX_CPUS {
            return Err(ConfigError::InvalidCpuCount(self.cpu_count));
        }
        if self.ram_size == 0 || self.ram_size % 4 != 0 {
            return Err(ConfigError::InvalidRamSize(self.ram_size));
        }
        if self.ram_base % 4 != 0 {
            return Err(ConfigError::MisalignedRamBase(self.ram_base));
        }
        if u64::from(self.ram_base) + u64::from(self.ram_size) > u64::from(u32::MAX) {
            return Err(ConfigError::RamOutOfRange {
                base: self.ram_base,
                size: self.ram_size,
            });
        }
        if self.max_block_insns == 0 {
            return Err(ConfigError::ZeroBlockLength);
        }
        if self.max_cached_blocks == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        if decode::decode_regular(self.sync_backdoor_word).is_some() {
            return Err(ConfigError::BackdoorCollides(self.sync_backdoor_word));
        }
        Ok(())
    }
}
