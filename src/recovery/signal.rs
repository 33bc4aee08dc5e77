use std::future;
use std::sync::Arc;

use rocket::tokio::sync::watch;

/// A value that is resolved at most once and can be awaited by any number of
/// consumers. Every consumer observes the same value; later attempts to
/// resolve it again are ignored.
///
/// Clones share the same slot.
pub struct OneShot<T> {
    slot: Arc<watch::Sender<Option<T>>>,
}

impl<T: Clone> OneShot<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Resolve with `value`. Returns false, leaving the first value in place,
    /// if already resolved.
    pub fn resolve(&self, value: T) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The resolved value, if any, without waiting.
    pub fn get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    /// Wait until resolved. Returns immediately if it already is.
    pub async fn wait(&self) -> T {
        let mut receiver = self.slot.subscribe();
        loop {
            if let Some(value) = receiver.borrow_and_update().clone() {
                return value;
            }
            if receiver.changed().await.is_err() {
                // Unreachable while `self` holds the sender.
                future::pending::<()>().await;
            }
        }
    }
}

impl<T> Clone for OneShot<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone> Default for OneShot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Raised exactly once by the UI when it has finished initialising.
pub type Readiness = OneShot<()>;
