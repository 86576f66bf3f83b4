/*!
 * Call Tracking
 * Records, pooling, per-context call stacks and lifecycle events
 */

pub mod events;
pub mod info;
pub mod pool;
pub mod scope;
pub mod stack;
pub mod stream;

pub use events::{CallEvent, CallEventKind, CallObserver, Subscription};
pub use info::{CallInfo, CallLink, MethodCallInfo, MethodDescriptor};
pub use pool::{CallRequest, MethodCallInfoPool, PoolStats, PooledCall};
pub use scope::{MethodScope, Monitor};
pub use stack::{CallFrame, CallStack};
pub use stream::{BufferStats, CallEventRecord, EventBuffer};
