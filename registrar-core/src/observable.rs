//! Versioned single-slot broadcast value.
//!
//! One writer publishes whole values with [`Observable::update`]; any number
//! of readers follow it through an [`Observer`]. Delivery is latest-value:
//! a reader never sees an older value after a newer one, but it may skip
//! values published between two of its wake-ups. This is not a queue.
//!
//! ```rust
//! use std::sync::Arc;
//! use registrar_core::Observable;
//!
//! let observable = Arc::new(Observable::new());
//! observable.update(1u32).unwrap();
//! assert_eq!(observable.current().as_deref(), Some(&1));
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::error::ObservableError;

struct Slot<T> {
    value: Option<Arc<T>>,
    version: u64,
    open: bool,
}

/// Shared value updated by one task and observed by many.
///
/// Construct once in the composition root and hand out `Arc` clones.
pub struct Observable<T> {
    slot: Mutex<Slot<T>>,
    notify: Notify,
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.lock();
        f.debug_struct("Observable")
            .field("version", &slot.version)
            .field("open", &slot.open)
            .field("has_value", &slot.value.is_some())
            .finish()
    }
}

impl<T> Observable<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                version: 0,
                open: true,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // The slot holds no invariants a panicking holder could break.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a new value and wake every waiting reader.
    ///
    /// Returns the new version.
    pub fn update(&self, value: T) -> Result<u64, ObservableError> {
        let version = {
            let mut slot = self.lock();
            if !slot.open {
                return Err(ObservableError::Closed);
            }
            slot.value = Some(Arc::new(value));
            slot.version += 1;
            slot.version
        };
        tracing::trace!(version, "observable update");
        self.notify.notify_waiters();
        Ok(version)
    }

    /// Mark the observable complete. Readers drain the final value and
    /// return. Idempotent.
    pub fn close(&self) {
        {
            let mut slot = self.lock();
            if !slot.open {
                return;
            }
            slot.open = false;
        }
        tracing::trace!("observable closed");
        self.notify.notify_waiters();
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Number of updates published so far.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// The latest value, without waiting.
    pub fn current(&self) -> Option<Arc<T>> {
        self.lock().value.clone()
    }

    /// A reader positioned before the first value.
    pub fn observer(self: &Arc<Self>) -> Observer<T> {
        Observer {
            observable: Arc::clone(self),
            seen: 0,
        }
    }

    /// Invoke `callback` with the current value and after each update, until
    /// the observable is closed.
    pub async fn observe<F>(self: &Arc<Self>, mut callback: F)
    where
        F: FnMut(Arc<T>),
    {
        let mut observer = self.observer();
        while let Some(value) = observer.next().await {
            callback(value);
        }
    }

    /// The first value `observe` would yield: the current value if there is
    /// one, otherwise the next update.
    pub async fn get(self: &Arc<Self>) -> Result<Arc<T>, ObservableError> {
        self.observer().next().await.ok_or(ObservableError::Closed)
    }
}

/// One reader's cursor into an [`Observable`].
pub struct Observer<T> {
    observable: Arc<Observable<T>>,
    seen: u64,
}

impl<T> Observer<T> {
    /// Wait for a value newer than the last one returned.
    ///
    /// Returns `None` once the observable is closed and its final value has
    /// been delivered.
    pub async fn next(&mut self) -> Option<Arc<T>> {
        loop {
            // Register for wake-up before inspecting the slot so an update
            // between the check and the await is not lost.
            let notified = self.observable.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let slot = self.observable.lock();
                if slot.version > self.seen {
                    if let Some(value) = &slot.value {
                        self.seen = slot.version;
                        return Some(Arc::clone(value));
                    }
                }
                if !slot.open {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Version of the last value this reader returned.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}
