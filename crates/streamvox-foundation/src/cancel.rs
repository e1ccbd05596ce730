use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation shared between the orchestrator, the engines and
/// the playback worker. One token is created per `play()` session; `stop()`
/// fires it and every loop holding a clone exits at its next check point
/// (engines between chunks, the player within one tick).
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Block the calling thread until cancellation or timeout, polling at a
    /// coarse interval. Intended for shutdown paths, not hot loops.
    pub fn wait_cancelled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.is_cancelled() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn wait_returns_early_on_cancel() {
        let token = CancelToken::new();
        let clone = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            clone.cancel();
        });
        let start = Instant::now();
        assert!(token.wait_cancelled(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }
}
