//! Block translation and the translated-block cache.
//!
//! A block is a straight-line run of decoded instructions starting at an entry PC. Breakpoints
//! are resolved at translation time: an address in the breakpoint registry either terminates the
//! block just before it, or (when it is the entry) becomes a block consisting of a single
//! [`Op::BreakpointCheck`]. Cached blocks are therefore only valid for the breakpoint set they were
//! translated against, and the registry invalidates them through [`CodeInvalidator`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tether_exit::{BreakpointRegistry, CodeInvalidator, GuestAddr};
use tracing::trace;

use crate::config::VmConfig;
use crate::decode::{decode, Insn};
use crate::mem::{GuestRam, MemError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Raise a breakpoint exit before executing anything at this PC.
    BreakpointCheck,
    Exec(Insn),
    /// The word at this PC is not a supported instruction.
    Illegal(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatedOp {
    pub pc: u32,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub entry: u32,
    /// One past the last guest byte covered by this block.
    pub end: u32,
    pub ops: Vec<TranslatedOp>,
}

impl Block {
    pub fn covers(&self, addr: GuestAddr) -> bool {
        (u64::from(self.entry)..u64::from(self.end)).contains(&addr)
    }

    pub fn instruction_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op.op, Op::Exec(_)))
            .count()
    }
}

/// Translates the block starting at `entry`.
///
/// Fails only if the entry word itself cannot be fetched; a fetch failure later in the block just
/// ends the block so the fault is reported when execution actually reaches it.
pub fn translate(
    ram: &GuestRam,
    breakpoints: &BreakpointRegistry,
    config: &VmConfig,
    entry: u32,
) -> Result<Block, MemError> {
    let mut ops = Vec::new();
    let mut pc = entry;

    loop {
        if breakpoints.contains(GuestAddr::from(pc)) {
            if ops.is_empty() {
                ops.push(TranslatedOp {
                    pc,
                    op: Op::BreakpointCheck,
                });
                pc = pc.wrapping_add(4);
            }
            break;
        }

        let word = match ram.read_u32(pc) {
            Ok(word) => word,
            Err(err) if ops.is_empty() => return Err(err),
            Err(_) => break,
        };

        match decode(word, config.sync_backdoor_word) {
            Some(insn) => {
                ops.push(TranslatedOp {
                    pc,
                    op: Op::Exec(insn),
                });
                pc = pc.wrapping_add(4);
                if insn.ends_block() || ops.len() >= config.max_block_insns {
                    break;
                }
            }
            None => {
                ops.push(TranslatedOp {
                    pc,
                    op: Op::Illegal(word),
                });
                pc = pc.wrapping_add(4);
                break;
            }
        }
    }

    trace!("translated block {entry:#x}..{pc:#x} ({} ops)", ops.len());
    Ok(Block {
        entry,
        end: pc,
        ops,
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Blocks dropped because an address they cover was invalidated.
    pub invalidated_blocks: u64,
    /// Whole-cache flushes, either explicit or due to reaching capacity.
    pub flushes: u64,
    /// Translations discarded because an invalidation raced with them.
    pub stale_inserts: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    blocks: HashMap<u32, Arc<Block>>,
    /// Bumped on every invalidation or flush.
    generation: u64,
    stats: CacheStats,
}

/// Translated blocks keyed by entry PC, shared by all vCPUs of a VM.
#[derive(Debug)]
pub struct BlockCache {
    inner: Mutex<CacheInner>,
    max_blocks: usize,
}

impl BlockCache {
    pub fn new(max_blocks: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_blocks: max_blocks.max(1),
        }
    }

    pub fn get_cloned(&self, entry: u32) -> Option<Arc<Block>> {
        let mut inner = self.inner.lock().unwrap();
        let block = inner.blocks.get(&entry).cloned();
        match block {
            Some(_) => inner.stats.hits += 1,
            None => inner.stats.misses += 1,
        }
        block
    }

    pub fn contains(&self, entry: u32) -> bool {
        self.inner.lock().unwrap().blocks.contains_key(&entry)
    }

    /// Current invalidation generation. Read it before translating and hand it back to
    /// [`Self::insert_if_current`].
    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap().generation
    }

    /// Caches `block` unless an invalidation happened since `generation` was read.
    ///
    /// Returns `false` if the block was translated against a stale breakpoint set and must be
    /// retranslated.
    pub fn insert_if_current(&self, generation: u64, block: Arc<Block>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation != generation {
            inner.stats.stale_inserts += 1;
            return false;
        }
        if inner.blocks.len() >= self.max_blocks && !inner.blocks.contains_key(&block.entry) {
            trace!("block cache full ({} blocks); flushing", inner.blocks.len());
            inner.blocks.clear();
            inner.stats.flushes += 1;
        }
        inner.blocks.insert(block.entry, block);
        true
    }

    /// Drops every cached block.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.blocks.clear();
        inner.generation += 1;
        inner.stats.flushes += 1;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats
    }
}

impl CodeInvalidator for BlockCache {
    fn invalidate(&self, addr: GuestAddr) {
        let mut inner = self.inner.lock().unwrap();
        inner.generation += 1;
        let before = inner.blocks.len();
        inner.blocks.retain(|_, block| !block.covers(addr));
        let dropped = (before - inner.blocks.len()) as u64;
        inner.stats.invalidated_blocks += dropped;
        trace!("invalidated {dropped} block(s) covering {addr:#x}");
    }
}
