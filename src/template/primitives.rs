//! Synchronization primitives and channel endpoints.
//!
//! Neither kind is ever copied from the template. Locks, one-shot guards
//! and counters start over in their initial state, so a lock that happens
//! to be held while the template is cloned is free in the instance.
//! Channel ends are not duplicated at all.

use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicI64, AtomicIsize, AtomicU32, AtomicU64, AtomicUsize, Ordering,
};
use std::sync::{Condvar, Mutex, Once, OnceLock, RwLock};

use tokio::sync::Notify;

use super::InstanceClone;

impl<T: Default> InstanceClone for Mutex<T> {
    fn clone_instance(&self) -> Self {
        Mutex::new(T::default())
    }
}

impl<T: Default> InstanceClone for RwLock<T> {
    fn clone_instance(&self) -> Self {
        RwLock::new(T::default())
    }
}

impl<T: Default> InstanceClone for tokio::sync::Mutex<T> {
    fn clone_instance(&self) -> Self {
        tokio::sync::Mutex::new(T::default())
    }
}

impl<T: Default> InstanceClone for tokio::sync::RwLock<T> {
    fn clone_instance(&self) -> Self {
        tokio::sync::RwLock::new(T::default())
    }
}

impl InstanceClone for Condvar {
    fn clone_instance(&self) -> Self {
        Condvar::new()
    }
}

impl InstanceClone for Once {
    fn clone_instance(&self) -> Self {
        Once::new()
    }
}

impl<T> InstanceClone for OnceLock<T> {
    fn clone_instance(&self) -> Self {
        OnceLock::new()
    }
}

impl InstanceClone for Notify {
    fn clone_instance(&self) -> Self {
        Notify::new()
    }
}

macro_rules! reset_atomic {
    ($($ty:ty => $init:expr),* $(,)?) => {
        $(
            impl InstanceClone for $ty {
                fn clone_instance(&self) -> Self {
                    <$ty>::new($init)
                }
            }
        )*
    };
}

reset_atomic!(
    AtomicBool => false,
    AtomicI32 => 0,
    AtomicI64 => 0,
    AtomicIsize => 0,
    AtomicU32 => 0,
    AtomicU64 => 0,
    AtomicUsize => 0,
);

/// A channel end held by a handler.
///
/// A live endpoint cannot be split between two owners, so every instance
/// cloned from a template starts with an absent endpoint. Handlers that
/// need one create it in `init`.
#[derive(Debug)]
pub struct Endpoint<T>(Option<T>);

impl<T> Endpoint<T> {
    pub fn new(end: T) -> Self {
        Self(Some(end))
    }

    pub fn absent() -> Self {
        Self(None)
    }

    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.0.as_mut()
    }

    pub fn set(&mut self, end: T) {
        self.0 = Some(end);
    }

    pub fn take(&mut self) -> Option<T> {
        self.0.take()
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }
}

impl<T> Default for Endpoint<T> {
    fn default() -> Self {
        Self::absent()
    }
}

impl<T> InstanceClone for Endpoint<T> {
    #[inline]
    fn clone_instance(&self) -> Self {
        Self::absent()
    }
}

/// Counter of outstanding tasks that can be awaited until it drains to zero.
#[derive(Debug, Default)]
pub struct WaitCounter {
    pending: AtomicUsize,
    drained: Notify,
}

impl WaitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.pending.fetch_add(n, Ordering::AcqRel);
    }

    /// Mark one task done. Extra calls past zero are ignored.
    pub fn done(&self) {
        let prev = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.drained.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until every added task has called [`done`](Self::done).
    pub async fn wait(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl InstanceClone for WaitCounter {
    fn clone_instance(&self) -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_atomic_reset() {
        let template = AtomicU64::new(17);
        assert_eq!(template.clone_instance().load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_once_reset() {
        let template = Once::new();
        template.call_once(|| {});

        let clone = template.clone_instance();
        assert!(template.is_completed());
        assert!(!clone.is_completed());
    }

    #[test]
    fn test_once_lock_reset() {
        let template = OnceLock::new();
        template.set(5u8).unwrap();

        assert!(template.clone_instance().get().is_none());
    }

    #[test]
    fn test_wait_counter_clone_starts_at_zero() {
        let template = WaitCounter::new();
        template.add(3);

        assert_eq!(template.clone_instance().pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_counter_drains() {
        let counter = Arc::new(WaitCounter::new());
        counter.add(2);

        for _ in 0..2 {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                counter.done();
            });
        }

        tokio::time::timeout(std::time::Duration::from_secs(1), counter.wait())
            .await
            .expect("counter should drain");
        assert_eq!(counter.pending(), 0);
    }

    #[tokio::test]
    async fn test_tokio_mutex_reset() {
        let template = tokio::sync::Mutex::new(3u8);
        let _held = template.lock().await;

        let clone = template.clone_instance();
        assert_eq!(*clone.try_lock().unwrap(), 0);
    }
}
