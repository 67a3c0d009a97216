//! Pattern auditor: an audit consumer that escalates to the deny-list
//!
//! Drains `EventRecord`s, counts a *strike* whenever a process opens a path
//! matching one of the disallowed patterns, and blocks the process once it
//! reaches the threshold.
//!
//! ```text
//!  EventConsumer ──► Auditor ──match──► strikes[pid] += 1
//!                                          │
//!                          strikes ≥ threshold && !blocked
//!                                          │
//!                                          ▼
//!                               PolicyControl::block(pid)
//! ```
//!
//! A pattern matches when it glob-matches the whole path (`*` does not cross
//! `/`) or when the path simply contains it.

use std::collections::{HashMap, HashSet};

use glob::{MatchOptions, Pattern};

use crate::config::AuditConfig;
use crate::engine::PolicyControl;
use crate::events::{EventConsumer, EventRecord};
use crate::policy::ProcessId;

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// One disallowed pattern
#[derive(Debug, Clone)]
struct PathRule {
    raw: String,
    glob: Option<Pattern>,
}

impl PathRule {
    fn new(raw: &str) -> Self {
        let glob = match Pattern::new(raw) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(
                    pattern = raw,
                    error = %e,
                    "invalid glob, using substring match only"
                );
                None
            }
        };
        Self {
            raw: raw.to_string(),
            glob,
        }
    }

    fn matches(&self, path: &str) -> bool {
        let globbed = self
            .glob
            .as_ref()
            .map(|g| g.matches_with(path, GLOB_OPTIONS))
            .unwrap_or(false);
        globbed || path.contains(self.raw.as_str())
    }
}

/// What processing one record did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// Not audited: other pid, no match, or a deny-list record
    Ignored,
    /// A strike, below the threshold or already blocked
    Strike { pid: ProcessId, strikes: u32 },
    /// A strike that put the process on the deny-list
    Blocked { pid: ProcessId, strikes: u32 },
}

pub struct Auditor<C> {
    control: C,
    rules: Vec<PathRule>,
    threshold: u32,
    target_pid: Option<ProcessId>,
    strikes: HashMap<ProcessId, u32>,
    blocked: HashSet<ProcessId>,
}

impl<C: PolicyControl> Auditor<C> {
    pub fn new(control: C, config: &AuditConfig) -> Self {
        Self {
            control,
            rules: config.disallowed.iter().map(|p| PathRule::new(p)).collect(),
            threshold: config.threshold.max(1),
            target_pid: config.target_pid,
            strikes: HashMap::new(),
            blocked: HashSet::new(),
        }
    }

    fn is_disallowed(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(path))
    }

    /// Audit one record
    pub fn process(&mut self, record: &EventRecord) -> AuditOutcome {
        let EventRecord::Open { event, .. } = record else {
            return AuditOutcome::Ignored;
        };
        if self.target_pid.is_some_and(|target| target != event.pid) {
            return AuditOutcome::Ignored;
        }

        let filename = event.filename_str();
        if !self.is_disallowed(&filename) {
            return AuditOutcome::Ignored;
        }

        let pid = event.pid;
        let strikes = self.strikes.entry(pid).or_insert(0);
        *strikes = strikes.saturating_add(1);
        let strikes = *strikes;

        tracing::warn!(
            pid,
            comm = %event.comm_str(),
            file = %filename,
            strikes,
            threshold = self.threshold,
            "disallowed file opened"
        );

        if strikes < self.threshold || self.blocked.contains(&pid) {
            return AuditOutcome::Strike { pid, strikes };
        }

        match self.control.block(pid) {
            Ok(()) => {
                self.blocked.insert(pid);
                tracing::warn!(pid, strikes, "process blocked from opening further files");
                AuditOutcome::Blocked { pid, strikes }
            }
            Err(e) => {
                tracing::error!(pid, error = %e, "failed to block process");
                AuditOutcome::Strike { pid, strikes }
            }
        }
    }

    /// Drain `consumer` until the reporter closes
    pub async fn run(&mut self, consumer: &mut EventConsumer) {
        tracing::info!(
            patterns = ?self.rules.iter().map(|r| r.raw.as_str()).collect::<Vec<_>>(),
            threshold = self.threshold,
            target_pid = ?self.target_pid,
            "auditor started"
        );
        while let Some(record) = consumer.recv().await {
            self.process(&record);
        }
        tracing::info!(total_strikes = self.total_strikes(), "auditor stopped");
    }

    pub fn strikes(&self, pid: ProcessId) -> u32 {
        self.strikes.get(&pid).copied().unwrap_or(0)
    }

    pub fn total_strikes(&self) -> u64 {
        self.strikes.values().map(|&n| n as u64).sum()
    }

    pub fn is_blocked(&self, pid: ProcessId) -> bool {
        self.blocked.contains(&pid)
    }

    pub fn blocked_pids(&self) -> Vec<ProcessId> {
        let mut pids: Vec<_> = self.blocked.iter().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn control(&self) -> &C {
        &self.control
    }
}
