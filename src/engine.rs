//! Per-open decision engine
//!
//! `DecisionEngine::evaluate` is called once for every intercepted file open,
//! possibly from many threads at once. It never fails and never panics: every
//! internal problem folds into a fixed default (listed below).
//!
//! ```text
//!              evaluate(pid, file, flags)
//!                          │
//!                  ┌───────▼────────┐  yes
//!                  │ deny-listed?   ├──────► Deny  (+violation, Blocked event)
//!                  └───────┬────────┘
//!                          │ no
//!                  ┌───────▼────────┐
//!                  │  mode of pid   │
//!                  └─┬─────┬──────┬─┘
//!                Off │ Learn      │ Enforce
//!                    ▼     ▼      ▼
//!                 Allow  read? ── no ──► Allow (bypass)
//!                          │ yes
//!            Learn: insert (pid, identity) → Allow
//!          Enforce: learned? → Allow : Deny (+violation)
//! ```
//!
//! Lock contention only delays a lookup, it never changes its answer. In
//! an atomic context the stores spin instead of parking (see
//! `policy::Access`). Defaults when information is missing:
//! - no mode entry, or a raw value outside the enum → Off (allow)
//! - allow-set full → identity not learned, counted in metrics
//! - violation counter full → denial not counted
//! - event channel full or closed → record dropped, decision unchanged

use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::events::{self, BlockedEvent, EventConsumer, EventRecord, EventReporter, OpenEvent};
use crate::identity::{self, AccessIntent, FileIdentity, FileMeta};
use crate::metrics::{self, DecisionCounters};
use crate::policy::{
    Access, AllowKey, AllowSet, DenyList, Inserted, Mode, ModeStore, ProcessId, StoreError,
    ViolationCounter,
};

/// Outcome handed back to the hook point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Allow,
    /// Permission denied
    Deny,
}

impl Decision {
    /// Return code for the hook: 0 to allow, `-EACCES` to deny
    pub fn code(&self) -> i32 {
        match self {
            Decision::Allow => 0,
            Decision::Deny => -libc::EACCES,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
        }
    }
}

/// Properties of the hook variant making the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationContext {
    /// Whether the caller may sleep. When false, every store access is
    /// non-blocking.
    pub can_block: bool,
}

impl InvocationContext {
    /// Sleepable hook
    pub const fn sleepable() -> Self {
        Self { can_block: true }
    }

    /// Hook that must not sleep
    pub const fn atomic() -> Self {
        Self { can_block: false }
    }

    fn access(&self) -> Access {
        Access::from_can_block(self.can_block)
    }
}

/// One intercepted open attempt
#[derive(Debug, Clone, Copy)]
pub struct OpenRequest<'a> {
    pub pid: ProcessId,
    pub uid: u32,
    pub comm: &'a [u8],
    /// Best effort; only used for the audit record
    pub path: Option<&'a Path>,
    pub file: FileMeta,
    pub flags: i32,
}

impl<'a> OpenRequest<'a> {
    pub fn new(pid: ProcessId, file: FileMeta, flags: i32) -> Self {
        Self {
            pid,
            uid: 0,
            comm: b"",
            path: None,
            file,
            flags,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_comm(mut self, comm: &'a [u8]) -> Self {
        self.comm = comm;
        self
    }

    pub fn with_path(mut self, path: &'a Path) -> Self {
        self.path = Some(path);
        self
    }
}

/// Which part of the policy produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    DenyList,
    Off,
    Bypass,
    Learn,
    EnforceAllow,
    EnforceDeny,
}

/// Control-plane operations
///
/// Implemented by `DecisionEngine`; the auditor is written against this
/// trait so it can drive a mock in tests.
pub trait PolicyControl {
    fn set_mode(&self, pid: ProcessId, mode: Mode) -> Result<(), StoreError>;
    fn clear_mode(&self, pid: ProcessId);
    fn block(&self, pid: ProcessId) -> Result<(), StoreError>;
    fn unblock(&self, pid: ProcessId);
    /// Forget every identity `pid` learned. Returns how many went.
    fn clear_allow_set(&self, pid: ProcessId) -> usize;
    fn violation_count(&self, pid: ProcessId) -> u64;
}

pub struct DecisionEngine {
    modes: ModeStore,
    deny_list: DenyList,
    allow_set: AllowSet,
    violations: ViolationCounter,
    reporter: EventReporter,
    audit_deny_list_hits: bool,
    counters: DecisionCounters,
}

impl DecisionEngine {
    /// Build an engine and the consumer end of its audit channel
    pub fn new(config: &EngineConfig) -> (Self, EventConsumer) {
        let (reporter, consumer) = events::channel(config.event_buffer_bytes);
        let engine = Self {
            modes: ModeStore::new(config.mode_capacity),
            deny_list: DenyList::new(config.deny_list_capacity),
            allow_set: AllowSet::new(config.allow_set_capacity),
            violations: ViolationCounter::new(config.violation_capacity),
            reporter,
            audit_deny_list_hits: config.audit_deny_list_hits,
            counters: DecisionCounters::resolve(),
        };

        tracing::debug!(
            modes = config.mode_capacity,
            deny_list = config.deny_list_capacity,
            allow_set = config.allow_set_capacity,
            event_slots = engine.reporter.slots(),
            "decision engine ready"
        );

        (engine, consumer)
    }

    /// Decide one open attempt and report it
    pub fn evaluate(&self, req: &OpenRequest<'_>, ctx: InvocationContext) -> Decision {
        let access = ctx.access();
        let (decision, branch) = self.decide(req, access);

        match branch {
            Branch::DenyList => self.counters.deny_list.inc(),
            Branch::Off => self.counters.off.inc(),
            Branch::Bypass => self.counters.bypass.inc(),
            Branch::Learn => self.counters.learn.inc(),
            Branch::EnforceAllow => self.counters.enforce_allow.inc(),
            Branch::EnforceDeny => self.counters.enforce_deny.inc(),
        }

        if decision == Decision::Deny {
            match self.violations.increment(req.pid, access) {
                Ok(_) => metrics::VIOLATIONS.inc(),
                Err(e) => tracing::debug!(pid = req.pid, error = %e, "violation not counted"),
            }
            tracing::debug!(pid = req.pid, ?branch, ino = req.file.ino, "open denied");
        } else {
            tracing::trace!(pid = req.pid, ?branch, ino = req.file.ino, "open allowed");
        }

        self.report(req, decision, branch);
        decision
    }

    fn decide(&self, req: &OpenRequest<'_>, access: Access) -> (Decision, Branch) {
        if self.deny_list.is_blocked_with(req.pid, access) {
            return (Decision::Deny, Branch::DenyList);
        }

        let mode = self.modes.mode_with(req.pid, access);
        if mode == Mode::Off {
            return (Decision::Allow, Branch::Off);
        }

        let intent = AccessIntent::from_flags(req.flags);
        let Some(identity) = identity::extract(&req.file, intent) else {
            return (Decision::Allow, Branch::Bypass);
        };
        let key = AllowKey::new(req.pid, identity);

        match mode {
            Mode::Learn => {
                match self.allow_set.learn(key, access) {
                    Ok(Inserted::New) => {
                        tracing::trace!(pid = req.pid, %identity, "identity learned");
                    }
                    Ok(Inserted::Replaced) => {}
                    Err(e) => {
                        metrics::ALLOW_SET_REJECTED.inc();
                        tracing::warn!(
                            pid = req.pid,
                            %identity,
                            error = %e,
                            "identity not learned"
                        );
                    }
                }
                (Decision::Allow, Branch::Learn)
            }
            Mode::Enforce => {
                if self.allow_set.contains(&key, access) {
                    (Decision::Allow, Branch::EnforceAllow)
                } else {
                    (Decision::Deny, Branch::EnforceDeny)
                }
            }
            Mode::Off => (Decision::Allow, Branch::Off),
        }
    }

    fn report(&self, req: &OpenRequest<'_>, decision: Decision, branch: Branch) {
        let record = match branch {
            Branch::DenyList if !self.audit_deny_list_hits => return,
            Branch::DenyList => EventRecord::Blocked(BlockedEvent::new(req.pid, req.comm)),
            _ => {
                let path = req.path.map(|p| p.as_os_str().as_bytes()).unwrap_or_default();
                EventRecord::Open {
                    event: OpenEvent::new(req.pid, req.uid, req.comm, path, req.flags),
                    decision,
                }
            }
        };
        self.reporter.emit(record);
    }

    /// Whether `pid` has learned `identity`
    pub fn is_learned(&self, pid: ProcessId, identity: FileIdentity) -> bool {
        self.allow_set
            .contains(&AllowKey::new(pid, identity), Access::Blocking)
    }

    pub fn mode(&self, pid: ProcessId) -> Mode {
        self.modes.get_mode(pid)
    }

    pub fn is_blocked(&self, pid: ProcessId) -> bool {
        self.deny_list.is_blocked(pid)
    }

    pub fn modes(&self) -> &ModeStore {
        &self.modes
    }

    pub fn deny_list(&self) -> &DenyList {
        &self.deny_list
    }

    pub fn allow_set(&self) -> &AllowSet {
        &self.allow_set
    }

    pub fn violations(&self) -> &ViolationCounter {
        &self.violations
    }

    pub fn reporter(&self) -> &EventReporter {
        &self.reporter
    }

    /// Audit records lost so far
    pub fn dropped_events(&self) -> u64 {
        self.reporter.dropped()
    }

    /// Close the audit channel; the consumer drains what is left and ends
    pub fn close_events(&self) {
        self.reporter.close();
    }

    /// Refresh the store-size gauges
    pub fn collect_metrics(&self) {
        metrics::ALLOW_SET_SIZE.set(self.allow_set.len() as f64);
        metrics::MODE_ENTRIES.set(self.modes.len() as f64);
        metrics::DENY_LIST_SIZE.set(self.deny_list.len() as f64);
    }
}

impl PolicyControl for DecisionEngine {
    fn set_mode(&self, pid: ProcessId, mode: Mode) -> Result<(), StoreError> {
        self.modes.set_mode(pid, mode).inspect_err(|e| {
            tracing::warn!(pid, %mode, error = %e, "mode not set");
        })?;
        tracing::info!(pid, %mode, "mode set");
        Ok(())
    }

    fn clear_mode(&self, pid: ProcessId) {
        let previous = self.modes.clear_mode(pid);
        tracing::info!(pid, %previous, "mode cleared");
    }

    fn block(&self, pid: ProcessId) -> Result<(), StoreError> {
        self.deny_list.block(pid).inspect_err(|e| {
            tracing::warn!(pid, error = %e, "pid not blocked");
        })?;
        tracing::info!(pid, "pid blocked");
        Ok(())
    }

    fn unblock(&self, pid: ProcessId) {
        if self.deny_list.unblock(pid) {
            tracing::info!(pid, "pid unblocked");
        }
    }

    fn clear_allow_set(&self, pid: ProcessId) -> usize {
        let removed = self.allow_set.clear_process(pid);
        tracing::info!(pid, removed, "allow-set cleared");
        removed
    }

    fn violation_count(&self, pid: ProcessId) -> u64 {
        self.violations.get(pid)
    }
}

impl<T: PolicyControl + ?Sized> PolicyControl for Arc<T> {
    fn set_mode(&self, pid: ProcessId, mode: Mode) -> Result<(), StoreError> {
        (**self).set_mode(pid, mode)
    }

    fn clear_mode(&self, pid: ProcessId) {
        (**self).clear_mode(pid)
    }

    fn block(&self, pid: ProcessId) -> Result<(), StoreError> {
        (**self).block(pid)
    }

    fn unblock(&self, pid: ProcessId) {
        (**self).unblock(pid)
    }

    fn clear_allow_set(&self, pid: ProcessId) -> usize {
        (**self).clear_allow_set(pid)
    }

    fn violation_count(&self, pid: ProcessId) -> u64 {
        (**self).violation_count(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_engine() -> (DecisionEngine, EventConsumer) {
        DecisionEngine::new(&EngineConfig {
            allow_set_capacity: 64,
            ..EngineConfig::default()
        })
    }

    fn read_of(pid: ProcessId, ino: u64) -> OpenRequest<'static> {
        OpenRequest::new(pid, FileMeta::new(8, 1, ino), libc::O_RDONLY)
    }

    #[test]
    fn test_decision_codes() {
        assert_eq!(Decision::Allow.code(), 0);
        assert_eq!(Decision::Deny.code(), -13);
    }

    #[test]
    fn test_off_allows_without_learning() {
        let (engine, _consumer) = small_engine();
        let decision = engine.evaluate(&read_of(1, 50), InvocationContext::sleepable());
        assert_eq!(decision, Decision::Allow);
        assert!(engine.allow_set().is_empty());
    }

    #[test]
    fn test_deny_list_wins_over_learned() {
        let (engine, _consumer) = small_engine();
        engine.set_mode(1, Mode::Learn).unwrap();
        engine.evaluate(&read_of(1, 50), InvocationContext::sleepable());
        engine.set_mode(1, Mode::Enforce).unwrap();
        engine.block(1).unwrap();

        assert_eq!(
            engine.evaluate(&read_of(1, 50), InvocationContext::atomic()),
            Decision::Deny
        );
        assert_eq!(engine.violation_count(1), 1);

        engine.unblock(1);
        assert_eq!(
            engine.evaluate(&read_of(1, 50), InvocationContext::atomic()),
            Decision::Allow
        );
    }

    #[test]
    fn test_deny_list_hit_emits_blocked_record() {
        let (engine, mut consumer) = small_engine();
        engine.block(3).unwrap();
        engine.evaluate(
            &read_of(3, 1).with_comm(b"curl"),
            InvocationContext::sleepable(),
        );

        match consumer.try_recv() {
            Some(EventRecord::Blocked(event)) => {
                assert_eq!(event.pid, 3);
                assert_eq!(event.comm_str(), "curl");
            }
            other => panic!("expected blocked record, got {:?}", other),
        }
    }

    #[test]
    fn test_deny_list_audit_can_be_disabled() {
        let (engine, mut consumer) = DecisionEngine::new(&EngineConfig {
            allow_set_capacity: 64,
            audit_deny_list_hits: false,
            ..EngineConfig::default()
        });
        engine.block(3).unwrap();
        assert_eq!(
            engine.evaluate(&read_of(3, 1), InvocationContext::sleepable()),
            Decision::Deny
        );
        assert!(consumer.try_recv().is_none());
    }

    #[test]
    fn test_enforce_without_learning_denies() {
        let (engine, _consumer) = small_engine();
        engine.set_mode(1, Mode::Enforce).unwrap();
        assert_eq!(
            engine.evaluate(&read_of(1, 99), InvocationContext::atomic()),
            Decision::Deny
        );
    }

    #[test]
    fn test_full_allow_set_denies_later() {
        let (engine, _consumer) = DecisionEngine::new(&EngineConfig {
            allow_set_capacity: 1,
            ..EngineConfig::default()
        });
        engine.set_mode(1, Mode::Learn).unwrap();
        engine.evaluate(&read_of(1, 50), InvocationContext::sleepable());
        // Still allowed while learning, but not recorded
        assert_eq!(
            engine.evaluate(&read_of(1, 51), InvocationContext::sleepable()),
            Decision::Allow
        );

        engine.set_mode(1, Mode::Enforce).unwrap();
        assert_eq!(
            engine.evaluate(&read_of(1, 50), InvocationContext::sleepable()),
            Decision::Allow
        );
        assert_eq!(
            engine.evaluate(&read_of(1, 51), InvocationContext::sleepable()),
            Decision::Deny
        );
    }

    #[test]
    fn test_event_carries_decision_and_path() {
        let (engine, mut consumer) = small_engine();
        engine.set_mode(5, Mode::Enforce).unwrap();
        let req = read_of(5, 7)
            .with_uid(1000)
            .with_comm(b"cat")
            .with_path(Path::new("/etc/hosts"));
        engine.evaluate(&req, InvocationContext::sleepable());

        match consumer.try_recv() {
            Some(EventRecord::Open { event, decision }) => {
                assert_eq!(decision, Decision::Deny);
                assert_eq!(event.uid, 1000);
                assert_eq!(event.comm_str(), "cat");
                assert_eq!(event.filename_str(), "/etc/hosts");
            }
            other => panic!("expected open record, got {:?}", other),
        }
    }
}
