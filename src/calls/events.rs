/*!
 * Call Lifecycle Events
 * Synchronous fan-out of start / end / status events to observers
 */

use super::info::MethodCallInfo;
use crate::core::types::ContextId;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Lifecycle stage of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEventKind {
    Started,
    Ended,
    Status,
}

/// Borrowed view handed to observers
///
/// Valid only for the duration of the callback; observers that keep data
/// copy it out (see `EventBuffer`).
#[derive(Debug, Clone, Copy)]
pub struct CallEvent<'a> {
    pub kind: CallEventKind,
    pub context: ContextId,
    pub info: &'a MethodCallInfo,
    /// Time since the call started, for `Ended` events
    pub elapsed: Option<Duration>,
}

/// Consumer of lifecycle events
///
/// Called on the publishing thread. Observers may track calls of their own,
/// as long as every frame they push is popped before they return.
///
/// `Started` is delivered before the record is on the stack: `depth`, `top`
/// and `with_frame` do not see it yet. The event's level and parent are the
/// ones linked at that moment; `push` re-links the record if another user
/// of the context moved the top before it lands. `Ended` is delivered after
/// the record has left the stack.
pub trait CallObserver: Send + Sync {
    fn on_event(&self, event: &CallEvent<'_>);
}

impl<F> CallObserver for F
where
    F: Fn(&CallEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &CallEvent<'_>) {
        self(event)
    }
}

type ObserverList = Vec<(u64, Arc<dyn CallObserver>)>;

/// Copy-on-write observer list
///
/// Publishing loads the list with one atomic pointer read; subscribe and
/// unsubscribe clone, modify and swap under a writer lock.
pub(crate) struct ObserverRegistry {
    observers: ArcSwap<ObserverList>,
    writer: Mutex<()>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self {
            observers: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe(self: &Arc<Self>, observer: Arc<dyn CallObserver>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let _writer = self.writer.lock();
            let mut next = (**self.observers.load()).clone();
            next.push((id, observer));
            self.observers.store(Arc::new(next));
        }
        Subscription {
            registry: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        let _writer = self.writer.lock();
        let mut next = (**self.observers.load()).clone();
        next.retain(|(observer_id, _)| *observer_id != id);
        self.observers.store(Arc::new(next));
    }

    #[inline]
    pub(crate) fn publish(&self, event: &CallEvent<'_>) {
        let observers = self.observers.load_full();
        for (_, observer) in observers.iter() {
            observer.on_event(event);
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.observers.load().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.load().len()
    }
}

/// Active observer registration; dropping it detaches the observer
#[must_use = "the observer is detached when the subscription is dropped"]
pub struct Subscription {
    registry: Weak<ObserverRegistry>,
    id: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
