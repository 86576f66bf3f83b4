/*!
 * Monitoring Controller
 * Versioned enable/disable state for the whole instrumentation core
 *
 * State lives in an immutable snapshot behind an `ArcSwap`:
 * - Readers load one snapshot and see flags and version together
 * - Writers are serialized, clone the flags, bump the version and swap
 * - Each snapshot owns its ShouldTrack cache, so a swap drops the old cache
 *   wholesale and a late insert can only land in a retired snapshot
 */

use super::diagnostics::MonitoringDiagnostics;
use super::version::{MonitoringVersion, VersionManager};
use crate::core::clock::Clock;
use crate::core::config::MonitorConfig;
use crate::core::types::ComponentType;
use ahash::RandomState;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

// ============================================================================
// Queries
// ============================================================================

/// Arguments of a ShouldTrack query beyond the captured version
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackQuery<'a> {
    pub reporter: Option<ComponentType>,
    pub filter: Option<ComponentType>,
    pub reporter_ids: Option<&'a [&'a str]>,
    /// Accept versions older than the current one
    pub allow_older_versions: bool,
}

impl<'a> TrackQuery<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reporter(mut self, reporter: ComponentType) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn filter(mut self, filter: ComponentType) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn reporter_ids(mut self, ids: &'a [&'a str]) -> Self {
        self.reporter_ids = Some(ids);
        self
    }

    pub fn allow_older_versions(mut self, allow: bool) -> Self {
        self.allow_older_versions = allow;
        self
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct TrackKey {
    version: MonitoringVersion,
    reporter: Option<ComponentType>,
    filter: Option<ComponentType>,
    reporter_ids: Option<Box<[Box<str>]>>,
    allow_older_versions: bool,
}

impl TrackKey {
    fn new(version: MonitoringVersion, query: &TrackQuery<'_>) -> Self {
        Self {
            version,
            reporter: query.reporter,
            filter: query.filter,
            reporter_ids: query
                .reporter_ids
                .map(|ids| ids.iter().map(|id| Box::<str>::from(*id)).collect()),
            allow_older_versions: query.allow_older_versions,
        }
    }
}

// ============================================================================
// State Snapshot
// ============================================================================

type FlagMap<K> = HashMap<K, bool, RandomState>;

#[derive(Debug, Clone, Default)]
struct ComponentFlags {
    enabled: bool,
    reporters: FlagMap<ComponentType>,
    filters: FlagMap<ComponentType>,
    output_types: FlagMap<ComponentType>,
    filter_overrides: FlagMap<(ComponentType, ComponentType)>,
    reporter_ids: HashMap<String, ComponentType, RandomState>,
}

impl ComponentFlags {
    fn reporter(&self, reporter: ComponentType) -> bool {
        self.reporters.get(&reporter).copied().unwrap_or(false)
    }

    /// The filter's own flag, narrowed by a per-reporter override
    ///
    /// An override can only switch an enabled filter off for one reporter.
    fn filter_for(&self, reporter: Option<ComponentType>, filter: ComponentType) -> bool {
        if !self.filters.get(&filter).copied().unwrap_or(false) {
            return false;
        }
        reporter
            .and_then(|reporter| self.filter_overrides.get(&(reporter, filter)).copied())
            .unwrap_or(true)
    }

    /// Unknown ids are trackable; ids whose reporter was explicitly
    /// disabled are not
    fn any_reporter_id(&self, ids: &[&str]) -> bool {
        ids.iter().any(|id| match self.reporter_ids.get(*id) {
            Some(reporter) => self.reporters.get(reporter) != Some(&false),
            None => true,
        })
    }

    fn evaluate(&self, query: &TrackQuery<'_>) -> bool {
        if let Some(reporter) = query.reporter {
            if !self.reporter(reporter) {
                return false;
            }
        }
        if let Some(filter) = query.filter {
            if !self.filter_for(query.reporter, filter) {
                return false;
            }
        }
        match query.reporter_ids {
            Some(ids) if !ids.is_empty() => self.any_reporter_id(ids),
            _ => true,
        }
    }
}

fn set_flag<K: Eq + std::hash::Hash>(map: &mut FlagMap<K>, key: K, state: bool) -> bool {
    map.insert(key, state) != Some(state)
}

struct Snapshot {
    version: MonitoringVersion,
    flags: ComponentFlags,
    cache: DashMap<TrackKey, bool, RandomState>,
}

impl Snapshot {
    fn new(version: MonitoringVersion, flags: ComponentFlags) -> Self {
        Self {
            version,
            flags,
            cache: DashMap::with_hasher(RandomState::new()),
        }
    }
}

// ============================================================================
// State Change Notifications
// ============================================================================

/// What a mutation changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Global {
        enabled: bool,
    },
    Reporter {
        reporter: ComponentType,
        enabled: bool,
    },
    Filter {
        filter: ComponentType,
        enabled: bool,
    },
    FilterForReporter {
        reporter: ComponentType,
        filter: ComponentType,
        enabled: bool,
    },
    OutputType {
        output_type: ComponentType,
        enabled: bool,
    },
    ReporterId {
        id: String,
        reporter: ComponentType,
    },
}

/// Notification delivered to state-changed callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub kind: ChangeKind,
    pub old_version: MonitoringVersion,
    pub new_version: MonitoringVersion,
}

type StateCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Default)]
struct CallbackRegistry {
    callbacks: RwLock<Vec<(u64, StateCallback)>>,
    next_id: AtomicU64,
}

impl CallbackRegistry {
    fn notify(&self, change: &StateChange) {
        // Clone out so a callback may register or drop handles
        let callbacks: Vec<StateCallback> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(change);
        }
    }
}

/// Registration of a state-changed callback; dropping it unregisters
#[must_use = "the callback is unregistered when the handle is dropped"]
pub struct CallbackHandle {
    registry: Weak<CallbackRegistry>,
    id: u64,
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.callbacks.write().retain(|(id, _)| *id != self.id);
        }
    }
}

// ============================================================================
// Operation Scope
// ============================================================================

/// Version captured at the start of one logical unit of work
///
/// Dropping it does nothing; it only pins the version the work should be
/// judged against, whatever other threads change meanwhile.
#[derive(Clone, Copy)]
pub struct OperationScope<'a> {
    controller: &'a MonitoringController,
    version: MonitoringVersion,
}

impl<'a> OperationScope<'a> {
    #[inline]
    pub fn version(&self) -> MonitoringVersion {
        self.version
    }

    /// Whether the work started under this scope should still be tracked
    #[inline]
    pub fn should_track(&self, query: &TrackQuery<'_>) -> bool {
        self.controller.should_track(self.version, query)
    }
}

impl fmt::Debug for OperationScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationScope")
            .field("version", &self.version)
            .finish()
    }
}

// ============================================================================
// Status
// ============================================================================

/// Serializable view of one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ControllerStatus {
    pub version: MonitoringVersion,
    pub enabled: bool,
    pub reporters: Vec<(String, bool)>,
    pub filters: Vec<(String, bool)>,
    pub output_types: Vec<(String, bool)>,
    pub filter_overrides: Vec<(String, String, bool)>,
    pub reporter_ids: Vec<(String, String)>,
}

fn sorted_flags(map: &FlagMap<ComponentType>) -> Vec<(String, bool)> {
    let mut flags: Vec<_> = map
        .iter()
        .map(|(component, state)| (component.short_name().to_string(), *state))
        .collect();
    flags.sort();
    flags
}

// ============================================================================
// Controller
// ============================================================================

/// Single source of truth for "is tracking active"
///
/// Constructible and injectable; nothing in the crate reaches for a global
/// instance.
pub struct MonitoringController {
    versions: VersionManager,
    snapshot: ArcSwap<Snapshot>,
    writer: Mutex<()>,
    diagnostics: Arc<MonitoringDiagnostics>,
    callbacks: Arc<CallbackRegistry>,
}

impl MonitoringController {
    /// Controller with monitoring enabled and default diagnostics
    pub fn new() -> Self {
        Self::from_config(&MonitorConfig::default())
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::build(
            VersionManager::new(),
            MonitoringDiagnostics::with_capacity(config.diagnostics_capacity),
            config.enabled,
        )
    }

    /// Controller whose versions and diagnostics read the given clock
    pub fn with_clock(config: &MonitorConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(
            VersionManager::with_clock(clock.clone()),
            MonitoringDiagnostics::with_clock(config.diagnostics_capacity, clock),
            config.enabled,
        )
    }

    fn build(versions: VersionManager, diagnostics: MonitoringDiagnostics, enabled: bool) -> Self {
        let version = versions.next_version();
        let flags = ComponentFlags {
            enabled,
            ..ComponentFlags::default()
        };
        info!(version = %version, enabled, "monitoring controller initialized");
        Self {
            versions,
            snapshot: ArcSwap::from_pointee(Snapshot::new(version, flags)),
            writer: Mutex::new(()),
            diagnostics: Arc::new(diagnostics),
            callbacks: Arc::new(CallbackRegistry::default()),
        }
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Clone-modify-swap under the writer lock
    ///
    /// `mutate` reports whether it changed anything; when it did not, the
    /// snapshot, version and callbacks are left alone.
    fn apply<F>(&self, kind: ChangeKind, mutate: F) -> bool
    where
        F: FnOnce(&mut ComponentFlags) -> bool,
    {
        let change = {
            let _writer = self.writer.lock();
            let current = self.snapshot.load_full();
            let mut flags = current.flags.clone();
            if !mutate(&mut flags) {
                return false;
            }

            let new_version = self.versions.next_version();
            self.snapshot
                .store(Arc::new(Snapshot::new(new_version, flags)));
            self.diagnostics.record(current.version, new_version);

            StateChange {
                kind,
                old_version: current.version,
                new_version,
            }
        };

        match &change.kind {
            ChangeKind::Global { enabled } => info!(
                old = %change.old_version,
                new = %change.new_version,
                enabled = *enabled,
                "monitoring state changed"
            ),
            kind => debug!(
                old = %change.old_version,
                new = %change.new_version,
                change = ?kind,
                "component state changed"
            ),
        }

        self.callbacks.notify(&change);
        true
    }

    /// Turn monitoring on; returns whether anything changed
    pub fn enable(&self) -> bool {
        self.set_enabled(true)
    }

    /// Turn monitoring off; per-component flags are kept as they are
    pub fn disable(&self) -> bool {
        self.set_enabled(false)
    }

    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.apply(ChangeKind::Global { enabled }, |flags| {
            let changed = flags.enabled != enabled;
            flags.enabled = enabled;
            changed
        })
    }

    pub fn enable_reporter(&self, reporter: ComponentType) -> bool {
        self.set_reporter_state(reporter, true)
    }

    pub fn disable_reporter(&self, reporter: ComponentType) -> bool {
        self.set_reporter_state(reporter, false)
    }

    pub fn set_reporter_state(&self, reporter: ComponentType, enabled: bool) -> bool {
        self.apply(ChangeKind::Reporter { reporter, enabled }, |flags| {
            set_flag(&mut flags.reporters, reporter, enabled)
        })
    }

    pub fn enable_filter(&self, filter: ComponentType) -> bool {
        self.set_filter_state(filter, true)
    }

    pub fn disable_filter(&self, filter: ComponentType) -> bool {
        self.set_filter_state(filter, false)
    }

    pub fn set_filter_state(&self, filter: ComponentType, enabled: bool) -> bool {
        self.apply(ChangeKind::Filter { filter, enabled }, |flags| {
            set_flag(&mut flags.filters, filter, enabled)
        })
    }

    /// Lift a per-reporter narrowing; a disabled filter stays disabled
    pub fn enable_filter_for_reporter(&self, reporter: ComponentType, filter: ComponentType) -> bool {
        self.set_filter_for_reporter(reporter, filter, true)
    }

    /// Switch a filter off for one reporter only
    pub fn disable_filter_for_reporter(
        &self,
        reporter: ComponentType,
        filter: ComponentType,
    ) -> bool {
        self.set_filter_for_reporter(reporter, filter, false)
    }

    fn set_filter_for_reporter(
        &self,
        reporter: ComponentType,
        filter: ComponentType,
        enabled: bool,
    ) -> bool {
        self.apply(
            ChangeKind::FilterForReporter {
                reporter,
                filter,
                enabled,
            },
            |flags| set_flag(&mut flags.filter_overrides, (reporter, filter), enabled),
        )
    }

    pub fn set_output_type_state(&self, output_type: ComponentType, enabled: bool) -> bool {
        self.apply(
            ChangeKind::OutputType {
                output_type,
                enabled,
            },
            |flags| set_flag(&mut flags.output_types, output_type, enabled),
        )
    }

    /// Map a reporter instance id to its reporter type
    pub fn register_reporter_id(&self, id: impl Into<String>, reporter: ComponentType) -> bool {
        let id = id.into();
        self.apply(
            ChangeKind::ReporterId {
                id: id.clone(),
                reporter,
            },
            |flags| flags.reporter_ids.insert(id, reporter) != Some(reporter),
        )
    }

    /// Register a state-changed callback
    pub fn on_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        let id = self.callbacks.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .callbacks
            .write()
            .push((id, Arc::new(callback)));
        CallbackHandle {
            registry: Arc::downgrade(&self.callbacks),
            id,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.snapshot.load().flags.enabled
    }

    /// Version of the current snapshot; never issues a new one
    #[inline]
    pub fn current_version(&self) -> MonitoringVersion {
        self.snapshot.load().version
    }

    pub fn is_reporter_enabled(&self, reporter: ComponentType) -> bool {
        let snapshot = self.snapshot.load();
        snapshot.flags.enabled && snapshot.flags.reporter(reporter)
    }

    pub fn is_filter_enabled(&self, filter: ComponentType) -> bool {
        let snapshot = self.snapshot.load();
        snapshot.flags.enabled && snapshot.flags.filter_for(None, filter)
    }

    pub fn is_filter_enabled_for_reporter(
        &self,
        reporter: ComponentType,
        filter: ComponentType,
    ) -> bool {
        let snapshot = self.snapshot.load();
        snapshot.flags.enabled && snapshot.flags.filter_for(Some(reporter), filter)
    }

    pub fn is_output_type_enabled(&self, output_type: ComponentType) -> bool {
        let snapshot = self.snapshot.load();
        snapshot.flags.enabled
            && snapshot
                .flags
                .output_types
                .get(&output_type)
                .copied()
                .unwrap_or(false)
    }

    /// Whether work that captured `version` should still record data
    ///
    /// Requires global monitoring, a version equal to the current one (or
    /// not newer, with `allow_older_versions`), and every component named in
    /// the query to be enabled. Results are cached per snapshot.
    pub fn should_track(&self, version: MonitoringVersion, query: &TrackQuery<'_>) -> bool {
        let snapshot = self.snapshot.load();
        if !snapshot.flags.enabled {
            return false;
        }

        let accepted = if query.allow_older_versions {
            version <= snapshot.version
        } else {
            version == snapshot.version
        };
        if !accepted {
            return false;
        }

        let key = TrackKey::new(version, query);
        if let Some(hit) = snapshot.cache.get(&key) {
            return *hit;
        }

        let result = snapshot.flags.evaluate(query);
        snapshot.cache.insert(key, result);
        result
    }

    /// Capture the current version for one unit of work
    #[inline]
    pub fn begin_operation(&self) -> OperationScope<'_> {
        OperationScope {
            controller: self,
            version: self.current_version(),
        }
    }

    /// Entries in the current snapshot's ShouldTrack cache
    pub fn cached_queries(&self) -> usize {
        self.snapshot.load().cache.len()
    }

    pub fn diagnostics(&self) -> &Arc<MonitoringDiagnostics> {
        &self.diagnostics
    }

    /// Serializable view of the current snapshot
    pub fn status(&self) -> ControllerStatus {
        let snapshot = self.snapshot.load();
        let flags = &snapshot.flags;

        let mut filter_overrides: Vec<_> = flags
            .filter_overrides
            .iter()
            .map(|((reporter, filter), state)| {
                (
                    reporter.short_name().to_string(),
                    filter.short_name().to_string(),
                    *state,
                )
            })
            .collect();
        filter_overrides.sort();

        let mut reporter_ids: Vec<_> = flags
            .reporter_ids
            .iter()
            .map(|(id, reporter)| (id.clone(), reporter.short_name().to_string()))
            .collect();
        reporter_ids.sort();

        ControllerStatus {
            version: snapshot.version,
            enabled: flags.enabled,
            reporters: sorted_flags(&flags.reporters),
            filters: sorted_flags(&flags.filters),
            output_types: sorted_flags(&flags.output_types),
            filter_overrides,
            reporter_ids,
        }
    }
}

impl Default for MonitoringController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MonitoringController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("MonitoringController")
            .field("version", &snapshot.version)
            .field("enabled", &snapshot.flags.enabled)
            .field("reporters", &snapshot.flags.reporters.len())
            .field("filters", &snapshot.flags.filters.len())
            .field("output_types", &snapshot.flags.output_types.len())
            .finish()
    }
}
