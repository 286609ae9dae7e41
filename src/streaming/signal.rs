//! Binary event shared between pipeline threads.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A flag threads can set, poll, and wait on
///
/// Clones refer to the same flag.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter
    pub fn set(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    /// Reset the flag
    pub fn clear(&self) {
        *self.inner.0.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block until the flag is set
    pub fn wait(&self) {
        let (flag, cvar) = &*self.inner;
        let mut set = flag.lock();
        while !*set {
            cvar.wait(&mut set);
        }
    }

    /// Block until the flag is set or `timeout` elapses; returns the flag
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (flag, cvar) = &*self.inner;
        let mut set = flag.lock();
        while !*set {
            if cvar.wait_until(&mut set, deadline).timed_out() {
                break;
            }
        }
        *set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_wakes_waiter() {
        let signal = Signal::new();
        let remote = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.set();
        });
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let signal = Signal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_clear() {
        let signal = Signal::new();
        signal.set();
        signal.wait();
        assert!(signal.is_set());
        signal.clear();
        assert!(!signal.is_set());
    }
}
