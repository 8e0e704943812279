//! Cancellable deferred callback used for client eviction

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

/// A callback scheduled on the tokio runtime
///
/// Dropping the timer cancels it, so replacing an `Option<EvictionTimer>`
/// never leaves two live timers behind.
#[derive(Debug)]
pub struct EvictionTimer {
    handle: JoinHandle<()>,
}

impl EvictionTimer {
    /// Run `on_expiry` once `after` has elapsed
    ///
    /// Returns `None` when called outside a tokio runtime.
    pub fn arm<F>(after: Duration, on_expiry: F) -> Option<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No tokio runtime, eviction timer not armed");
            return None;
        };

        let handle = runtime.spawn(async move {
            tokio::time::sleep(after).await;
            on_expiry();
        });
        Some(Self { handle })
    }

    /// Cancel the timer
    pub fn cancel(self) {
        drop(self);
    }

    /// Check if the callback already ran or was cancelled
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for EvictionTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
