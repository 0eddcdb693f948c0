//! Single-assignment result shared between many waiters.
//!
//! A [`Deferred`] is created before its value is known, settled exactly once
//! (from any task) and awaited by any number of tasks. It is the rendezvous
//! point between the document that closes the build barrier and every other
//! document waiting on the same sub-build.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{Error, Result};

/// A future-like slot that is resolved or rejected at most once.
///
/// Cloning a `Deferred` yields another handle to the same slot. Settling after
/// the first call is ignored; every waiter observes the first outcome.
#[derive(Debug)]
pub struct Deferred<T> {
    slot: Arc<watch::Sender<Option<Result<T>>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T> {
    /// Create an unsettled slot.
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Resolve with a value. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with an error. Returns `false` if already settled.
    pub fn reject(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    /// Settle with an outcome. Returns `false` if already settled.
    pub fn settle(&self, outcome: Result<T>) -> bool {
        let mut outcome = Some(outcome);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    /// Whether `resolve`, `reject` or `settle` has been called.
    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Whether both handles refer to the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Clone> Deferred<T> {
    /// Wait for the outcome.
    ///
    /// Every waiter receives a clone of the same value or the same error.
    pub async fn wait(&self) -> Result<T> {
        let mut receiver = self.slot.subscribe();
        // `self` keeps the sender alive, so `wait_for` can only return once settled.
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|slot| slot.clone());

        outcome.unwrap_or_else(|| {
            Err(Error::Internal(
                "deferred result dropped before it was settled".to_string(),
            ))
        })
    }

    /// The outcome if already settled.
    pub fn peek(&self) -> Option<Result<T>> {
        self.slot.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolve_before_wait() {
        let deferred = Deferred::new();
        assert!(deferred.resolve(7));
        assert_eq!(deferred.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_second_settle_is_ignored() {
        let deferred = Deferred::new();
        assert!(deferred.resolve(1));
        assert!(!deferred.resolve(2));
        assert!(!deferred.reject(Error::Internal("late".to_string())));
        assert_eq!(deferred.wait().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_waiters_see_same_value() {
        let deferred: Deferred<String> = Deferred::new();

        let waiters: Vec<_> = (0..16)
            .map(|_| {
                let deferred = deferred.clone();
                tokio::spawn(async move { deferred.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        deferred.resolve("done".to_string());

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), "done");
        }
    }

    #[tokio::test]
    async fn test_rejection_reaches_every_waiter() {
        let deferred: Deferred<u32> = Deferred::new();
        let first = deferred.clone();
        let second = deferred.clone();

        deferred.reject(Error::OutputCollision {
            path: "dist/a.js".to_string(),
        });

        for handle in [first, second] {
            match handle.wait().await {
                Err(Error::OutputCollision { path }) => assert_eq!(path, "dist/a.js"),
                other => panic!("expected collision, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_peek_and_is_settled() {
        let deferred: Deferred<u8> = Deferred::new();
        assert!(!deferred.is_settled());
        assert!(deferred.peek().is_none());
        deferred.resolve(3);
        assert!(deferred.is_settled());
        assert_eq!(deferred.peek().unwrap().unwrap(), 3);
    }
}
