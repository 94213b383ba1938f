//! Registry of guest addresses at which execution must stop.
//!
//! Engines bake breakpoint checks into translated code, so the registry is only consulted when a
//! block is (re)translated. Every mutation therefore has to discard cached translations covering
//! the affected address before any vCPU can run them again: a stale block would either skip a newly
//! inserted breakpoint or keep firing a removed one.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::GuestAddr;

/// Engine-side hook invoked whenever the breakpoint set changes.
///
/// Implementations must be idempotent: the cache may hold nothing for `addr`, or may already have
/// dropped it.
///
/// There is no vCPU parameter: translations are shared by every vCPU, so invalidating an address
/// always applies to all of them.
pub trait CodeInvalidator: Send + Sync {
    /// Discard every cached translation whose guest range covers `addr`, for all vCPUs.
    fn invalidate(&self, addr: GuestAddr);
}

/// Invalidator for engines that do not cache translations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CodeInvalidator for NoopInvalidator {
    fn invalidate(&self, _addr: GuestAddr) {}
}

pub struct BreakpointRegistry {
    addrs: Mutex<HashSet<GuestAddr>>,
    invalidator: Arc<dyn CodeInvalidator>,
}

impl BreakpointRegistry {
    pub fn new(invalidator: Arc<dyn CodeInvalidator>) -> Self {
        Self {
            addrs: Mutex::new(HashSet::new()),
            invalidator,
        }
    }

    /// Adds `addr`, returning whether it was not already present.
    ///
    /// Cached translations for `addr` are invalidated even when the breakpoint already existed.
    pub fn insert(&self, addr: GuestAddr) -> bool {
        // The invalidation happens under the set lock so a concurrent translator can never
        // observe the new set while still holding on to code translated against the old one.
        let mut addrs = self.addrs.lock().unwrap();
        let inserted = addrs.insert(addr);
        self.invalidator.invalidate(addr);
        debug!(inserted, "breakpoint set at {addr:#x}");
        inserted
    }

    /// Removes `addr`, returning whether it was present.
    pub fn remove(&self, addr: GuestAddr) -> bool {
        let mut addrs = self.addrs.lock().unwrap();
        let removed = addrs.remove(&addr);
        if removed {
            self.invalidator.invalidate(addr);
        }
        debug!(removed, "breakpoint removed at {addr:#x}");
        removed
    }

    pub fn contains(&self, addr: GuestAddr) -> bool {
        self.addrs.lock().unwrap().contains(&addr)
    }

    /// Removes every breakpoint, invalidating each removed address.
    pub fn clear(&self) {
        let mut addrs = self.addrs.lock().unwrap();
        for addr in addrs.drain() {
            trace!("breakpoint cleared at {addr:#x}");
            self.invalidator.invalidate(addr);
        }
    }

    pub fn len(&self) -> usize {
        self.addrs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current breakpoints in ascending order.
    pub fn addresses(&self) -> Vec<GuestAddr> {
        let mut out: Vec<GuestAddr> = self.addrs.lock().unwrap().iter().copied().collect();
        out.sort_unstable();
        out
    }
}

impl fmt::Debug for BreakpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakpointRegistry")
            .field("addrs", &self.addresses())
            .finish_non_exhaustive()
    }
}
