//! Connection barrier between call control and the command loop.
//!
//! Starts at zero. Every code path that hands a connection (or a teardown)
//! to the command loop releases once; the command loop acquires once per
//! receive attempt, and `disconnect` acquires once to catch up with a loop
//! that already advanced past a release.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Semaphore;

#[derive(Debug)]
pub struct ConnectionBarrier {
    permits: Semaphore,
    releases: AtomicU64,
    acquires: AtomicU64,
}

impl Default for ConnectionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBarrier {
    pub fn new() -> Self {
        Self { permits: Semaphore::new(0), releases: AtomicU64::new(0), acquires: AtomicU64::new(0) }
    }

    pub fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.permits.add_permits(1);
    }

    /// Wait for one release and consume it.
    pub async fn acquire(&self) {
        // The semaphore is never closed, so acquire only fails on close.
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
        self.acquires.fetch_add(1, Ordering::SeqCst);
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> u64 {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Releases not yet consumed.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::ConnectionBarrier;

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let barrier = Arc::new(ConnectionBarrier::new());
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        barrier.release();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(barrier.releases(), 1);
        assert_eq!(barrier.acquires(), 1);
        assert_eq!(barrier.available(), 0);
    }
}
