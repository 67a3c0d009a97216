//! Prometheus metrics for the decision engine
//!
//! Counters are bumped from the decision path, so labelled series are
//! resolved once (see `DecisionCounters`) and the hot path only touches
//! atomics.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Decision Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Decisions by outcome and by the policy branch that produced them.
    ///
    /// Labels:
    /// - outcome: "allow" or "deny"
    /// - branch: "deny_list", "off", "learn", "enforce", "bypass"
    pub static ref DECISIONS: CounterVec = register_counter_vec!(
        "readfence_decisions_total",
        "File-open decisions by outcome and policy branch",
        &["outcome", "branch"]
    ).expect("failed to register DECISIONS metric");

    /// Learn-mode inserts that were dropped because the allow-set was full.
    ///
    /// Each one is a file that will be denied under Enforce.
    pub static ref ALLOW_SET_REJECTED: Counter = register_counter!(
        "readfence_allow_set_rejected_total",
        "Learn-mode identities that could not be recorded"
    ).expect("failed to register ALLOW_SET_REJECTED metric");

    /// Denials that were recorded in the violation counter
    pub static ref VIOLATIONS: Counter = register_counter!(
        "readfence_violations_total",
        "Denied opens counted against a process"
    ).expect("failed to register VIOLATIONS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Audit Channel Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    pub static ref EVENTS_EMITTED: Counter = register_counter!(
        "readfence_events_emitted_total",
        "Audit records queued for the consumer"
    ).expect("failed to register EVENTS_EMITTED metric");

    /// Records lost because the channel was full or the consumer was gone.
    pub static ref EVENTS_DROPPED: Counter = register_counter!(
        "readfence_events_dropped_total",
        "Audit records dropped"
    ).expect("failed to register EVENTS_DROPPED metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Store Gauges (refreshed by DecisionEngine::collect_metrics)
    // ─────────────────────────────────────────────────────────────────────────────

    pub static ref ALLOW_SET_SIZE: Gauge = register_gauge!(
        "readfence_allow_set_entries",
        "Learned (process, file) pairs"
    ).expect("failed to register ALLOW_SET_SIZE metric");

    pub static ref MODE_ENTRIES: Gauge = register_gauge!(
        "readfence_mode_entries",
        "Processes with a Learn or Enforce mode"
    ).expect("failed to register MODE_ENTRIES metric");

    pub static ref DENY_LIST_SIZE: Gauge = register_gauge!(
        "readfence_deny_list_entries",
        "Processes on the static deny-list"
    ).expect("failed to register DENY_LIST_SIZE metric");
}

/// Pre-resolved decision series, one per (outcome, branch) the engine emits
#[derive(Clone)]
pub struct DecisionCounters {
    pub deny_list: Counter,
    pub off: Counter,
    pub bypass: Counter,
    pub learn: Counter,
    pub enforce_allow: Counter,
    pub enforce_deny: Counter,
}

impl DecisionCounters {
    pub fn resolve() -> Self {
        Self {
            deny_list: DECISIONS.with_label_values(&["deny", "deny_list"]),
            off: DECISIONS.with_label_values(&["allow", "off"]),
            bypass: DECISIONS.with_label_values(&["allow", "bypass"]),
            learn: DECISIONS.with_label_values(&["allow", "learn"]),
            enforce_allow: DECISIONS.with_label_values(&["allow", "enforce"]),
            enforce_deny: DECISIONS.with_label_values(&["deny", "enforce"]),
        }
    }
}

/// Render the default registry in the Prometheus text format
pub fn gather_text() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buf).to_string()
}
