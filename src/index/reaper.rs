//! Background pruning of reclaimed index entries.

use crate::error::{Error, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often an idle reaper checks for shutdown.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Keep running.
    Continue,
    /// The thing being reaped is gone; stop.
    Stop,
}

/// A detached background thread that runs a prune pass whenever reclamation
/// notifications arrive.
///
/// The loop blocks on the notification channel, drains it, runs one pass
/// and sleeps for `interval` before waiting again. A pass returning an error
/// is logged and the loop carries on. A pass that panics kills the thread;
/// that only becomes visible to [`Reaper::wait`].
///
/// Dropping the reaper asks the thread to stop but never joins it.
pub struct Reaper {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl Reaper {
    /// Spawn the reaper thread.
    pub fn spawn<T, F>(
        name: &str,
        notifications: Receiver<T>,
        interval: Duration,
        mut pass: F,
    ) -> Result<Self>
    where
        T: Send + 'static,
        F: FnMut() -> Result<Pass> + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::SeqCst) {
                    return Ok(());
                }

                match notifications.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
                    Ok(_) => {}
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return Ok(()),
                }
                let drained = 1 + notifications.try_iter().count();

                match pass() {
                    Ok(Pass::Continue) => {
                        log::trace!("Reaper pass after {} notifications", drained);
                    }
                    Ok(Pass::Stop) => return Ok(()),
                    Err(e) => log::error!("Reaper pass failed: {}", e),
                }

                thread::sleep(interval);
            }
        })?;

        Ok(Self { shutdown, thread: Some(thread) })
    }

    /// Whether the reaper thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the reaper and wait for it.
    ///
    /// Returns [`Error::ReaperTerminated`] if the thread died abnormally.
    pub fn wait(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        match thread.join() {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(Error::ReaperTerminated(msg))
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
