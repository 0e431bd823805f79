//! Counting semaphore with runtime-mutable capacity and FIFO waiters.
//!
//! ## Capacity changes
//!
//! Growing the capacity immediately wakes up to `(new − old)` waiters.
//! Shrinking never revokes permits already held: `active` may exceed
//! `capacity` after a shrink and decreases toward it through natural
//! `release()` calls, during which no new acquisition succeeds.
//!
//! Implemented by hand because `tokio::sync::Semaphore` has no mutable
//! capacity: permits can be added but a shrink would have to forget permits
//! that are currently held.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{LectorError, Result};

enum WaitOutcome {
    Granted,
    Cancelled(String),
}

struct SemState {
    capacity: usize,
    active: usize,
    waiters: VecDeque<oneshot::Sender<WaitOutcome>>,
}

impl SemState {
    /// Hand free slots to the oldest waiters. Waiters whose acquire future
    /// was dropped are skipped without consuming a slot.
    fn wake_waiters(&mut self) {
        while self.active < self.capacity {
            let Some(tx) = self.waiters.pop_front() else {
                break;
            };
            if tx.send(WaitOutcome::Granted).is_ok() {
                self.active += 1;
            }
        }
    }
}

/// A counting semaphore whose slot count can change at runtime without the
/// semaphore being replaced.
pub struct DynamicSemaphore {
    state: Mutex<SemState>,
}

impl DynamicSemaphore {
    /// Create a semaphore with `capacity` slots. Capacity has a floor of 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SemState {
                capacity: capacity.max(1),
                active: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquire one slot, suspending until one is available.
    ///
    /// Waiters are served strictly FIFO. Fails only when the wait is
    /// cancelled via [`cancel_all_waiters`](Self::cancel_all_waiters).
    pub async fn acquire(&self) -> Result<()> {
        let rx = {
            let mut st = self.state.lock();
            if st.active < st.capacity && st.waiters.is_empty() {
                st.active += 1;
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            st.waiters.push_back(tx);
            rx
        };

        match rx.await {
            Ok(WaitOutcome::Granted) => Ok(()),
            Ok(WaitOutcome::Cancelled(reason)) => Err(LectorError::AcquireCancelled { reason }),
            Err(_) => Err(LectorError::AcquireCancelled {
                reason: "semaphore dropped".into(),
            }),
        }
    }

    /// Acquire one slot without suspending.
    ///
    /// Fails when no slot is free or when waiters are queued ahead (FIFO
    /// fairness is never bypassed).
    pub fn try_acquire(&self) -> bool {
        let mut st = self.state.lock();
        if st.active < st.capacity && st.waiters.is_empty() {
            st.active += 1;
            true
        } else {
            false
        }
    }

    /// Release one held slot, waking the oldest waiter if capacity permits.
    ///
    /// # Panics
    /// Panics when called with no slot held — a bug in the caller.
    pub fn release(&self) {
        let mut st = self.state.lock();
        if st.active == 0 {
            panic!("DynamicSemaphore::release called with no permit held");
        }
        st.active -= 1;
        st.wake_waiters();
    }

    /// Change the slot count. Growth wakes waiters immediately; shrink
    /// lets `active` drain down through natural releases. Floor of 1.
    pub fn set_capacity(&self, capacity: usize) {
        let mut st = self.state.lock();
        st.capacity = capacity.max(1);
        st.wake_waiters();
    }

    /// Fail every pending `acquire()` with the given reason. Subsequent
    /// acquires succeed again if capacity permits.
    pub fn cancel_all_waiters(&self, reason: &str) {
        let mut st = self.state.lock();
        for tx in st.waiters.drain(..) {
            let _ = tx.send(WaitOutcome::Cancelled(reason.to_string()));
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Currently held slot count. May exceed `capacity()` after a shrink.
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl std::fmt::Debug for DynamicSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("DynamicSemaphore")
            .field("capacity", &st.capacity)
            .field("active", &st.active)
            .field("waiting", &st.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex as PlMutex;

    #[tokio::test]
    async fn acquire_and_release_cycle() {
        let sem = DynamicSemaphore::new(2);
        sem.acquire().await.unwrap();
        sem.acquire().await.unwrap();
        assert_eq!(sem.active(), 2);
        assert!(!sem.try_acquire());

        sem.release();
        assert_eq!(sem.active(), 1);
        assert!(sem.try_acquire());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiters_are_served_fifo() {
        let sem = Arc::new(DynamicSemaphore::new(1));
        sem.acquire().await.unwrap();

        let order = Arc::new(PlMutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let sem = Arc::clone(&sem);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                sem.acquire().await.unwrap();
                order.lock().push(i);
                sem.release();
            }));
            // Let each waiter register before the next arrives.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(sem.waiting(), 3);

        sem.release();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(&*order.lock(), &vec![0, 1, 2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capacity_growth_wakes_waiters() {
        let sem = Arc::new(DynamicSemaphore::new(1));
        sem.acquire().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let sem = Arc::clone(&sem);
            handles.push(tokio::spawn(async move { sem.acquire().await }));
        }
        while sem.waiting() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // +2 slots wake exactly two of the three waiters.
        sem.set_capacity(3);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sem.active(), 3);
        assert_eq!(sem.waiting(), 1);
    }

    #[tokio::test]
    async fn shrink_never_revokes_held_permits() {
        let sem = DynamicSemaphore::new(4);
        for _ in 0..4 {
            sem.acquire().await.unwrap();
        }

        sem.set_capacity(1);
        assert_eq!(sem.active(), 4);
        assert!(!sem.try_acquire());

        // Draining down to capacity re-opens exactly one slot.
        sem.release();
        sem.release();
        sem.release();
        assert_eq!(sem.active(), 1);
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_all_waiters_fails_pending_acquires() {
        let sem = Arc::new(DynamicSemaphore::new(1));
        sem.acquire().await.unwrap();

        let waiter = {
            let sem = Arc::clone(&sem);
            tokio::spawn(async move { sem.acquire().await })
        };
        while sem.waiting() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        sem.cancel_all_waiters("shutting down");
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, LectorError::AcquireCancelled { .. }));

        // The semaphore remains usable afterwards.
        sem.release();
        assert!(sem.try_acquire());
    }

    #[tokio::test]
    async fn capacity_floor_is_one() {
        let sem = DynamicSemaphore::new(0);
        assert_eq!(sem.capacity(), 1);
        sem.set_capacity(0);
        assert_eq!(sem.capacity(), 1);
    }

    #[test]
    #[should_panic(expected = "no permit held")]
    fn release_without_permit_panics() {
        let sem = DynamicSemaphore::new(1);
        sem.release();
    }
}
