/*!
 * Call Records
 * Identity, timing and hierarchy position of one tracked call
 */

use crate::core::limits::RECORD_PARAMETER_CAPACITY;
use crate::core::types::CallId;
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Static description of an instrumented method
///
/// Built once where the instrumentation site is set up and shared by every
/// call through an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    declaring_type: Arc<str>,
    name: Arc<str>,
    parameter_types: Arc<[Arc<str>]>,
}

impl MethodDescriptor {
    pub fn new(declaring_type: &str, name: &str) -> Self {
        Self {
            declaring_type: Arc::from(declaring_type),
            name: Arc::from(name),
            parameter_types: Arc::from(Vec::new()),
        }
    }

    pub fn with_parameter_types(mut self, types: &[&str]) -> Self {
        self.parameter_types = types.iter().map(|t| Arc::<str>::from(*t)).collect();
        self
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub(crate) fn declaring_type_shared(&self) -> &Arc<str> {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.parameter_types.iter().map(|t| &**t)
    }

    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }

    /// `Type.Method(A, B)`
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.parameter_types().collect();
        format!("{}.{}({})", self.declaring_type, self.name, params.join(", "))
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

/// Back-reference to a call's parent
///
/// Copies the parent's identity instead of pointing at it; the parent record
/// stays owned by its stack and pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CallLink {
    pub call_id: CallId,
    pub level: u32,
}

impl CallLink {
    /// Link to the null sentinel: no parent, level 0
    pub const NULL: CallLink = CallLink {
        call_id: CallId::NULL,
        level: 0,
    };

    #[inline]
    pub fn is_null(&self) -> bool {
        self.call_id.is_null()
    }
}

/// One call's record
///
/// Rented from a `MethodCallInfoPool`, linked by `CallStack::push`, and
/// blanked when it goes back. String fields keep their capacity across
/// rentals so a warm pool rents without allocating.
pub struct MethodCallInfo {
    pub(crate) call_id: CallId,
    pub(crate) pool_id: u64,
    pub(crate) id: String,
    pub(crate) owner: String,
    pub(crate) class_type: Option<Arc<str>>,
    pub(crate) method: Option<Arc<MethodDescriptor>>,
    pub(crate) generic_arguments: Vec<String>,
    pub(crate) parameters: HashMap<String, String, RandomState>,
    pub(crate) is_external: bool,
    pub(crate) external_type_name: String,
    pub(crate) parent: CallLink,
    pub(crate) parent_id: String,
    pub(crate) level: u32,
    pub(crate) start_time: Instant,
    pub(crate) is_null: bool,
}

impl MethodCallInfo {
    pub(crate) fn blank(pool_id: u64) -> Self {
        Self {
            call_id: CallId::NULL,
            pool_id,
            id: String::new(),
            owner: String::new(),
            class_type: None,
            method: None,
            generic_arguments: Vec::new(),
            parameters: HashMap::with_capacity_and_hasher(
                RECORD_PARAMETER_CAPACITY,
                RandomState::new(),
            ),
            is_external: false,
            external_type_name: String::new(),
            parent: CallLink::NULL,
            parent_id: String::new(),
            level: 0,
            start_time: Instant::now(),
            is_null: false,
        }
    }

    /// The shared null sentinel
    pub fn null() -> &'static MethodCallInfo {
        static NULL: OnceLock<MethodCallInfo> = OnceLock::new();
        NULL.get_or_init(|| MethodCallInfo {
            is_null: true,
            ..MethodCallInfo::blank(0)
        })
    }

    /// Clear every field, keeping allocated capacity
    pub(crate) fn reset(&mut self) {
        self.call_id = CallId::NULL;
        self.id.clear();
        self.owner.clear();
        self.class_type = None;
        self.method = None;
        self.generic_arguments.clear();
        self.parameters.clear();
        self.is_external = false;
        self.external_type_name.clear();
        self.parent = CallLink::NULL;
        self.parent_id.clear();
        self.level = 0;
    }

    #[inline]
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Correlation id supplied by the caller
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Runtime type of the owner, empty for the sentinel
    pub fn class_type(&self) -> &str {
        self.class_type.as_deref().unwrap_or("")
    }

    pub fn method(&self) -> Option<&MethodDescriptor> {
        self.method.as_deref()
    }

    pub fn method_name(&self) -> &str {
        self.method.as_ref().map(|m| m.name()).unwrap_or("")
    }

    pub fn declaring_type(&self) -> &str {
        self.method.as_ref().map(|m| m.declaring_type()).unwrap_or("")
    }

    pub fn generic_arguments(&self) -> &[String] {
        &self.generic_arguments
    }

    pub fn parameters(&self) -> &HashMap<String, String, RandomState> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Add or replace a parameter; ignored on the sentinel
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if !self.is_null {
            self.parameters.insert(key.into(), value.into());
        }
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.is_external
    }

    /// Type of the uninstrumented callee, for external calls
    pub fn external_type_name(&self) -> Option<&str> {
        self.is_external.then_some(self.external_type_name.as_str())
    }

    #[inline]
    pub fn parent(&self) -> CallLink {
        self.parent
    }

    /// Correlation id of the parent, empty at the root
    #[inline]
    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    /// Depth in the hierarchy; root calls are level 1, the sentinel is 0
    #[inline]
    pub fn level(&self) -> u32 {
        self.level
    }

    #[inline]
    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// This record as a parent link
    #[inline]
    pub fn link(&self) -> CallLink {
        CallLink {
            call_id: self.call_id,
            level: self.level,
        }
    }

    /// Hook this record under `parent`
    pub(crate) fn link_to(&mut self, parent: &MethodCallInfo) {
        self.parent = parent.link();
        self.parent_id.clear();
        self.parent_id.push_str(&parent.id);
        self.level = parent.level + 1;
    }

    pub(crate) fn link_to_root(&mut self) {
        self.parent = CallLink::NULL;
        self.parent_id.clear();
        self.level = 1;
    }

    pub(crate) fn link_to_detached(&mut self, parent: CallLink, parent_id: &str) {
        self.parent = parent;
        self.parent_id.clear();
        self.parent_id.push_str(parent_id);
        self.level = parent.level + 1;
    }
}

impl fmt::Debug for MethodCallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null {
            return f.write_str("MethodCallInfo(null)");
        }
        f.debug_struct("MethodCallInfo")
            .field("call_id", &self.call_id)
            .field("id", &self.id)
            .field("method", &self.method.as_ref().map(|m| m.to_string()))
            .field("level", &self.level)
            .field("parent", &self.parent.call_id)
            .field("is_external", &self.is_external)
            .finish()
    }
}

/// A rented record or the null sentinel
///
/// Every operation on `Null` is a no-op, so code downstream of a disabled
/// rent never branches on it.
pub enum CallInfo {
    Active(Box<MethodCallInfo>),
    Null,
}

impl CallInfo {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, CallInfo::Null)
    }

    /// Mutable access; `None` for the sentinel
    #[inline]
    pub fn as_active_mut(&mut self) -> Option<&mut MethodCallInfo> {
        match self {
            CallInfo::Active(record) => Some(record.as_mut()),
            CallInfo::Null => None,
        }
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(record) = self.as_active_mut() {
            record.set_parameter(key, value);
        }
    }
}

impl Deref for CallInfo {
    type Target = MethodCallInfo;

    #[inline]
    fn deref(&self) -> &MethodCallInfo {
        match self {
            CallInfo::Active(record) => record.as_ref(),
            CallInfo::Null => MethodCallInfo::null(),
        }
    }
}

impl fmt::Debug for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
