use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide suspension requests.
///
/// `exit_requested` is set by anyone (a watchdog, the driver) and polled by the engine at block
/// boundaries. Setting it is fire-and-forget: there is no acknowledgement and the only latency
/// guarantee is "the next time the dispatch loop polls".
#[derive(Debug, Default)]
pub struct SuspensionFlags {
    exit_requested: AtomicBool,
}

impl SuspensionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::Release);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.exit_requested.store(false, Ordering::Release);
    }
}
