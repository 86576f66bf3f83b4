/*!
 * Core Types
 * Identifiers shared by the controller, the pool and the call stack
 */

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Common result type for monitoring operations
pub type MonitorResult<T> = Result<T, super::errors::MonitorError>;

// ============================================================================
// Execution Context
// ============================================================================

/// Caller-visible key of one call stack
///
/// Every OS thread gets its own id through [`ContextId::current`]. Work that
/// hops threads (async tasks, thread pools) either sticks to the id it
/// captured or allocates a fresh one and carries its parent explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u64);

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_CONTEXT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

impl ContextId {
    /// Context of the calling thread, allocated on first use
    #[inline]
    pub fn current() -> Self {
        THREAD_CONTEXT.with(|slot| match slot.get() {
            Some(id) => id,
            None => {
                let id = Self::fresh();
                slot.set(Some(id));
                id
            }
        })
    }

    /// A context id that no thread owns yet
    #[inline]
    pub fn fresh() -> Self {
        Self(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

// ============================================================================
// Call Identity
// ============================================================================

/// Identity of one rented call record
///
/// Zero is reserved for the null sentinel; live records get ids from the
/// pool's counter, so a recycled record never reuses an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl CallId {
    pub const NULL: CallId = CallId(0);

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

// ============================================================================
// Component Types
// ============================================================================

/// Type identity of a reporter, filter or output type
///
/// Components are keyed by their Rust type, the display name only feeds
/// logs and status reports.
#[derive(Clone, Copy)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl std::hash::Hash for ComponentType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentType").field(&self.name).finish()
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
