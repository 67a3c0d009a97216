use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use readfence::audit::Auditor;
use readfence::identity::{FileIdentity, FileMeta};
use readfence::replay;
use readfence::{metrics, telemetry, Config, DecisionEngine};

#[derive(Parser, Debug)]
#[command(name = "readfence", version, about = "Per-process file-open access control")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Export traces to this OTLP endpoint
    #[arg(long, global = true)]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON-lines trace through the engine
    Replay {
        trace: PathBuf,

        /// Comma-separated disallowed path patterns for the auditor
        #[arg(long, value_delimiter = ',')]
        disallowed: Vec<String>,

        /// Strikes before the auditor blocks a process
        #[arg(long)]
        threshold: Option<u32>,

        /// Only audit this pid
        #[arg(long)]
        pid: Option<u32>,

        /// Print the Prometheus metrics afterwards
        #[arg(long)]
        metrics: bool,
    },
    /// Print the file identity of each path
    Identity { paths: Vec<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if cli.json_logs {
        config.telemetry.json_logs = true;
    }
    if let Some(endpoint) = cli.otlp_endpoint.clone() {
        config.telemetry.otlp_endpoint = Some(endpoint);
    }

    telemetry::init_tracing("readfence", &config.telemetry)
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;

    let result = match cli.command {
        Command::Replay {
            trace,
            disallowed,
            threshold,
            pid,
            metrics: print_metrics,
        } => {
            if !disallowed.is_empty() {
                config.audit.disallowed = disallowed
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
            }
            if let Some(threshold) = threshold {
                config.audit.threshold = threshold;
            }
            if pid.is_some() {
                config.audit.target_pid = pid;
            }
            config.validate()?;
            run_replay(&config, trace, print_metrics).await
        }
        Command::Identity { paths } => print_identities(&paths),
    };

    telemetry::shutdown_tracing();
    result
}

async fn run_replay(
    config: &Config,
    trace: PathBuf,
    print_metrics: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut consumer) = DecisionEngine::new(&config.engine);
    let engine = Arc::new(engine);

    let mut auditor = Auditor::new(Arc::clone(&engine), &config.audit);
    let audit_task = tokio::spawn(async move {
        auditor.run(&mut consumer).await;
        auditor
    });

    let stop = Arc::new(AtomicBool::new(false));
    let replay_engine = Arc::clone(&engine);
    let replay_stop = Arc::clone(&stop);
    let mut replay_task = tokio::task::spawn_blocking(move || {
        replay::replay_file(&replay_engine, &trace, &replay_stop)
    });

    let finished = tokio::select! {
        joined = &mut replay_task => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };
    let joined = match finished {
        Some(joined) => joined,
        None => {
            tracing::warn!("interrupted, stopping replay");
            stop.store(true, Ordering::Relaxed);
            replay_task.await
        }
    };

    // The auditor ends once the channel is closed and drained
    engine.close_events();
    let auditor = audit_task.await?;
    engine.collect_metrics();
    let summary = joined??;

    println!(
        "opens: {}  allowed: {}  denied: {}  control ops: {}",
        summary.opens, summary.allowed, summary.denied, summary.control_ops
    );
    println!(
        "audit events: {} emitted, {} dropped",
        engine.reporter().emitted(),
        engine.dropped_events()
    );
    for (pid, count) in engine.violations().snapshot() {
        println!("violations pid={} count={}", pid, count);
    }
    for pid in auditor.blocked_pids() {
        println!(
            "pid {} blocked by auditor after {} strikes",
            pid,
            auditor.strikes(pid)
        );
    }

    if print_metrics {
        print!("{}", metrics::gather_text());
    }

    Ok(())
}

fn print_identities(paths: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    for path in paths {
        let meta = FileMeta::from_metadata(&std::fs::metadata(path)?);
        let identity = FileIdentity::new(meta.dev_major, meta.dev_minor, meta.ino);
        println!("{}\t{}\tdev=0x{:08x}", path.display(), identity, identity.dev);
    }
    Ok(())
}
