use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tether_exit::ExitContext;
use tracing::warn;

/// Requests an exit from the engine if it is not disarmed within a timeout.
///
/// Dropping the watchdog disarms it.
#[derive(Debug)]
pub struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<bool>>,
}

impl Watchdog {
    pub fn arm(ctx: Arc<ExitContext>, timeout: Duration) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let thread = thread::spawn(move || match cancelled.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("watchdog expired after {timeout:?}; requesting exit");
                ctx.request_exit_asap();
                true
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        });
        Self {
            cancel: Some(cancel),
            thread: Some(thread),
        }
    }

    /// Stops the watchdog and reports whether it had already fired.
    pub fn disarm(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        drop(self.cancel.take());
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or(false),
            None => false,
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
