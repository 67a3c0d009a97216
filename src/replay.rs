//! Trace replay
//!
//! Drives the engine from a JSON-lines trace of control-plane changes and
//! open attempts, which makes it possible to dry-run a policy against a
//! recorded workload.
//!
//! ```text
//! {"op":"set_mode","pid":100,"mode":"learn"}
//! {"op":"open","pid":100,"path":"/etc/hosts","comm":"cat","uid":1000}
//! {"op":"set_mode","pid":100,"mode":"enforce"}
//! {"op":"open","pid":100,"dev":[8,1],"ino":51}
//! {"op":"open","pid":100,"path":"/var/log/app.log","flags":1025}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;

use crate::engine::{Decision, DecisionEngine, InvocationContext, OpenRequest, PolicyControl};
use crate::identity::FileMeta;
use crate::policy::{Mode, ProcessId, StoreError};

/// Mode as written in a trace: a name or a raw value
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ModeSpec {
    Named(Mode),
    Raw(u8),
}

impl ModeSpec {
    pub fn resolve(&self) -> Mode {
        match self {
            ModeSpec::Named(mode) => *mode,
            ModeSpec::Raw(raw) => Mode::from_raw(*raw),
        }
    }
}

/// One attempted open in a trace
#[derive(Debug, Clone, Deserialize)]
pub struct OpenStep {
    pub pid: ProcessId,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub comm: String,
    pub path: Option<PathBuf>,
    /// `[major, minor]`; when set together with `ino`, the path is not stat'ed
    pub dev: Option<(u32, u32)>,
    pub ino: Option<u64>,
    #[serde(default)]
    pub flags: i32,
    #[serde(default = "default_can_block")]
    pub can_block: bool,
}

fn default_can_block() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    SetMode { pid: ProcessId, mode: ModeSpec },
    ClearMode { pid: ProcessId },
    Block { pid: ProcessId },
    Unblock { pid: ProcessId },
    ClearAllowSet { pid: ProcessId },
    Open(OpenStep),
}

/// Totals for one replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub opens: u64,
    pub allowed: u64,
    pub denied: u64,
    pub control_ops: u64,
}

/// Error type for replay
#[derive(Debug)]
pub enum ReplayError {
    /// Reading the trace failed
    Io(std::io::Error),
    /// A line is not a valid step
    Parse { line: usize, source: serde_json::Error },
    /// An open step has neither `dev`+`ino` nor a path that can be stat'ed
    Stat { line: usize, path: Option<PathBuf>, source: Option<std::io::Error> },
    /// A control-plane write was rejected
    Store { line: usize, source: StoreError },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Io(e) => write!(f, "trace read error: {}", e),
            ReplayError::Parse { line, source } => {
                write!(f, "line {}: invalid step: {}", line, source)
            }
            ReplayError::Stat { line, path: Some(path), source: Some(e) } => {
                write!(f, "line {}: cannot stat {}: {}", line, path.display(), e)
            }
            ReplayError::Stat { line, .. } => {
                write!(f, "line {}: open needs dev+ino or a path", line)
            }
            ReplayError::Store { line, source } => write!(f, "line {}: {}", line, source),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Io(e) => Some(e),
            ReplayError::Parse { source, .. } => Some(source),
            ReplayError::Stat { source, .. } => source
                .as_ref()
                .map(|e| e as &(dyn std::error::Error + 'static)),
            ReplayError::Store { source, .. } => Some(source),
        }
    }
}

fn file_meta(step: &OpenStep, line: usize) -> Result<FileMeta, ReplayError> {
    if let (Some((major, minor)), Some(ino)) = (step.dev, step.ino) {
        return Ok(FileMeta::new(major, minor, ino));
    }
    let Some(path) = step.path.as_deref() else {
        return Err(ReplayError::Stat { line, path: None, source: None });
    };
    std::fs::metadata(path)
        .map(|meta| FileMeta::from_metadata(&meta))
        .map_err(|e| ReplayError::Stat {
            line,
            path: Some(path.to_path_buf()),
            source: Some(e),
        })
}

pub struct Replayer<'e> {
    engine: &'e DecisionEngine,
    summary: ReplaySummary,
    stop: Option<&'e AtomicBool>,
}

impl<'e> Replayer<'e> {
    pub fn new(engine: &'e DecisionEngine) -> Self {
        Self {
            engine,
            summary: ReplaySummary::default(),
            stop: None,
        }
    }

    /// Check `stop` before every line and end the replay once it is set
    pub fn with_stop(mut self, stop: &'e AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_some_and(|stop| stop.load(Ordering::Relaxed))
    }

    /// Apply one step. Returns the decision for open steps.
    pub fn apply(&mut self, step: &Step, line: usize) -> Result<Option<Decision>, ReplayError> {
        let store_err = |source: StoreError| ReplayError::Store { line, source };

        match step {
            Step::SetMode { pid, mode } => {
                self.engine.set_mode(*pid, mode.resolve()).map_err(store_err)?;
            }
            Step::ClearMode { pid } => self.engine.clear_mode(*pid),
            Step::Block { pid } => self.engine.block(*pid).map_err(store_err)?,
            Step::Unblock { pid } => self.engine.unblock(*pid),
            Step::ClearAllowSet { pid } => {
                self.engine.clear_allow_set(*pid);
            }
            Step::Open(open) => {
                let meta = file_meta(open, line)?;
                let mut req = OpenRequest::new(open.pid, meta, open.flags)
                    .with_uid(open.uid)
                    .with_comm(open.comm.as_bytes());
                if let Some(path) = open.path.as_deref() {
                    req = req.with_path(path);
                }
                let ctx = InvocationContext { can_block: open.can_block };
                let decision = self.engine.evaluate(&req, ctx);

                self.summary.opens += 1;
                match decision {
                    Decision::Allow => self.summary.allowed += 1,
                    Decision::Deny => self.summary.denied += 1,
                }
                return Ok(Some(decision));
            }
        }

        self.summary.control_ops += 1;
        Ok(None)
    }

    /// Parse and apply every line of `reader`
    pub fn run<R: BufRead>(mut self, reader: R) -> Result<ReplaySummary, ReplayError> {
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            if self.stop_requested() {
                tracing::warn!(line = line_no, "replay stopped before the end of the trace");
                break;
            }
            let line = line.map_err(ReplayError::Io)?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let step: Step = serde_json::from_str(trimmed).map_err(|source| ReplayError::Parse {
                line: line_no,
                source,
            })?;
            self.apply(&step, line_no)?;
        }

        tracing::info!(
            opens = self.summary.opens,
            allowed = self.summary.allowed,
            denied = self.summary.denied,
            control_ops = self.summary.control_ops,
            "replay finished"
        );
        Ok(self.summary)
    }

    pub fn summary(&self) -> ReplaySummary {
        self.summary
    }
}

/// Replay the trace file at `path`, ending early once `stop` is set
pub fn replay_file(
    engine: &DecisionEngine,
    path: &Path,
    stop: &AtomicBool,
) -> Result<ReplaySummary, ReplayError> {
    let file = std::fs::File::open(path).map_err(ReplayError::Io)?;
    Replayer::new(engine)
        .with_stop(stop)
        .run(std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> DecisionEngine {
        let (engine, _consumer) = DecisionEngine::new(&EngineConfig {
            allow_set_capacity: 64,
            ..EngineConfig::default()
        });
        engine
    }

    #[test]
    fn test_parse_steps() {
        let step: Step =
            serde_json::from_str(r#"{"op":"set_mode","pid":1,"mode":"enforce"}"#).unwrap();
        assert!(matches!(
            step,
            Step::SetMode { pid: 1, ref mode } if mode.resolve() == Mode::Enforce
        ));

        let step: Step = serde_json::from_str(r#"{"op":"set_mode","pid":1,"mode":7}"#).unwrap();
        assert!(matches!(step, Step::SetMode { ref mode, .. } if mode.resolve() == Mode::Off));

        let step: Step =
            serde_json::from_str(r#"{"op":"open","pid":2,"dev":[8,1],"ino":50}"#).unwrap();
        match step {
            Step::Open(open) => {
                assert_eq!(open.dev, Some((8, 1)));
                assert!(open.can_block);
                assert_eq!(open.flags, 0);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_run_summary() {
        let engine = engine();
        let trace = r#"
# learn then enforce
{"op":"set_mode","pid":100,"mode":"learn"}
{"op":"open","pid":100,"dev":[8,1],"ino":50}
{"op":"set_mode","pid":100,"mode":"enforce"}
{"op":"open","pid":100,"dev":[8,1],"ino":50}
{"op":"open","pid":100,"dev":[8,1],"ino":51,"can_block":false}
"#;
        let summary = Replayer::new(&engine).run(trace.as_bytes()).unwrap();
        assert_eq!(
            summary,
            ReplaySummary {
                opens: 3,
                allowed: 2,
                denied: 1,
                control_ops: 2
            }
        );
        assert_eq!(engine.violation_count(100), 1);
    }

    #[test]
    fn test_stop_flag_ends_replay() {
        let engine = engine();
        let stop = AtomicBool::new(true);
        let trace = r#"
{"op":"block","pid":1}
{"op":"open","pid":1,"dev":[8,1],"ino":2}
"#;
        let summary = Replayer::new(&engine)
            .with_stop(&stop)
            .run(trace.as_bytes())
            .unwrap();
        assert_eq!(summary, ReplaySummary::default());
        assert!(!engine.is_blocked(1));

        stop.store(false, Ordering::Relaxed);
        let summary = Replayer::new(&engine)
            .with_stop(&stop)
            .run(trace.as_bytes())
            .unwrap();
        assert_eq!(summary.opens, 1);
        assert_eq!(summary.denied, 1);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let engine = engine();
        let err = Replayer::new(&engine)
            .run("{\"op\":\"block\",\"pid\":1}\n{\"op\":\"bogus\"}\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, ReplayError::Parse { line: 2, .. }));

        let err = Replayer::new(&engine)
            .run(r#"{"op":"open","pid":1}"#.as_bytes())
            .unwrap_err();
        assert!(matches!(err, ReplayError::Stat { line: 1, path: None, .. }));

        let err = Replayer::new(&engine)
            .run(r#"{"op":"open","pid":1,"path":"/nonexistent/readfence/file"}"#.as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("cannot stat"));
    }
}
