use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemError {
    #[error("unmapped guest access at {addr:#x} (len {len})")]
    Unmapped { addr: u32, len: u32 },
    #[error("misaligned {len}-byte guest access at {addr:#x}")]
    Misaligned { addr: u32, len: u32 },
}

/// Flat big-endian guest RAM.
#[derive(Debug, Clone)]
pub struct GuestRam {
    base: u32,
    bytes: Vec<u8>,
}

impl GuestRam {
    pub fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            bytes: vec![0; size as usize],
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn offset(&self, addr: u32, len: u32) -> Result<usize, MemError> {
        let off = addr
            .checked_sub(self.base)
            .ok_or(MemError::Unmapped { addr, len })? as usize;
        let end = off
            .checked_add(len as usize)
            .ok_or(MemError::Unmapped { addr, len })?;
        if end > self.bytes.len() {
            return Err(MemError::Unmapped { addr, len });
        }
        Ok(off)
    }

    pub fn read_u32(&self, addr: u32) -> Result<u32, MemError> {
        if addr % 4 != 0 {
            return Err(MemError::Misaligned { addr, len: 4 });
        }
        let off = self.offset(addr, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[off..off + 4]);
        Ok(u32::from_be_bytes(word))
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), MemError> {
        if addr % 4 != 0 {
            return Err(MemError::Misaligned { addr, len: 4 });
        }
        let off = self.offset(addr, 4)?;
        self.bytes[off..off + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn read_bytes(&self, addr: u32, len: u32) -> Result<&[u8], MemError> {
        let off = self.offset(addr, len)?;
        Ok(&self.bytes[off..off + len as usize])
    }

    /// Copies `data` into RAM starting at `addr`. Nothing is written if the range is unmapped.
    pub fn load(&mut self, addr: u32, data: &[u8]) -> Result<(), MemError> {
        let len = u32::try_from(data.len()).map_err(|_| MemError::Unmapped {
            addr,
            len: u32::MAX,
        })?;
        let off = self.offset(addr, len)?;
        self.bytes[off..off + data.len()].copy_from_slice(data);
        Ok(())
    }
}
