//! Waiting and cancellation
//!
//! Every suspension point in a migration (retry backoff, inter-batch and
//! inter-account delays) goes through a [`Sleeper`], so tests can record
//! waits instead of performing them and a user interrupt can cut them short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Blocks the current thread for a duration
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Shared flag set when the user asks the migration to stop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Real sleeper that wakes early once the token is cancelled
pub struct ThreadSleeper {
    cancel: CancelToken,
}

impl ThreadSleeper {
    /// Granularity at which a sleep notices cancellation
    const SLICE: Duration = Duration::from_millis(200);

    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        // A deadline past the clock's range only ends on cancellation
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    (deadline - now).min(Self::SLICE)
                }
                None => Self::SLICE,
            };
            std::thread::sleep(slice);
        }
    }
}

/// Sleeper that records requested waits without blocking
#[derive(Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Vec<Duration>> {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every wait requested so far, in order
    pub fn waits(&self) -> Vec<Duration> {
        self.recorded().clone()
    }

    pub fn total(&self) -> Duration {
        self.recorded().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.recorded().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_thread_sleeper_returns_early_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let sleeper = ThreadSleeper::new(token);

        let start = Instant::now();
        sleeper.sleep(Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_thread_sleeper_survives_unrepresentable_deadline() {
        let token = CancelToken::new();
        let sleeper = ThreadSleeper::new(token.clone());
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });

        let start = Instant::now();
        sleeper.sleep(Duration::MAX);
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn test_thread_sleeper_waits() {
        let sleeper = ThreadSleeper::new(CancelToken::new());
        let start = Instant::now();
        sleeper.sleep(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(1));
        sleeper.sleep(Duration::from_secs(2));
        assert_eq!(sleeper.waits().len(), 2);
        assert_eq!(sleeper.total(), Duration::from_secs(3));
    }

    #[test]
    fn test_recording_sleeper_after_panicking_holder() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let shared = Arc::clone(&sleeper);
        let result = std::thread::spawn(move || {
            let _guard = shared.waits.lock().unwrap();
            panic!("holder died");
        })
        .join();
        assert!(result.is_err());

        sleeper.sleep(Duration::from_secs(1));
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(1)]);
    }
}
