// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Hotswap - Entry point for the swap binary
//!
//! Invoked by the running program just before it exits. The exit code is the
//! outcome: 0 success, 1 fatal failure, 2 rolled back.

use clap::Parser;
use hotswap::{FileLog, Orchestrator, RunLog, SystemPlatform, UpdateRequest, load_policy};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hotswap")]
#[command(author, version, about = "Replace a running executable and roll back on failure")]
#[command(
    long_about = "Stops the service, terminates the running image, replaces the target\n\
    with the new artifact and launches it. Restores the newest backup on failure.\n\
    \nExit codes:\n  \
    0  updated and running\n  \
    1  fatal failure (bad parameters, missing privileges, or rollback failed)\n  \
    2  update failed, previous version restored\n\
    \nExamples:\n  \
    hotswap AgentService /tmp/agent.new /opt/agent/agent /opt/agent/backup\n  \
    hotswap \"\" ./agent.new ./agent ./backup --time-unit-ms 100"
)]
struct Cli {
    /// Service registration to stop and remove (empty for none)
    service: String,

    /// Path to the new artifact
    new_artifact: PathBuf,

    /// Path of the artifact to replace
    target_artifact: PathBuf,

    /// Directory holding `<name>.backup.<token>` files
    backup_dir: PathBuf,

    /// JSON swap policy; defaults apply when omitted
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run log [default: update.log next to the target]
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Override the base time unit of every wait
    #[arg(long, value_name = "MS")]
    time_unit_ms: Option<u64>,

    /// Refuse to swap unless the new artifact has this SHA256
    #[arg(long, value_name = "HEX")]
    expected_sha256: Option<String>,

    /// Do not keep a phase journal next to the target
    #[arg(long)]
    no_journal: bool,
}

fn default_log_path(target: &Path) -> PathBuf {
    target
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("update.log")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hotswap=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let log_path = cli
        .log_file
        .clone()
        .unwrap_or_else(|| default_log_path(&cli.target_artifact));
    let log = FileLog::open(&log_path)?;
    info!("Run log: {}", log_path.display());

    let mut policy = match load_policy(cli.config.as_deref()) {
        Ok(policy) => policy,
        Err(e) => {
            log.error(&format!("Invalid configuration: {e}"));
            return Ok(ExitCode::from(1));
        }
    };
    if let Some(unit) = cli.time_unit_ms {
        policy.time_unit_ms = unit;
    }

    let request = UpdateRequest::new(
        Some(cli.service.as_str()),
        cli.new_artifact,
        cli.target_artifact,
        cli.backup_dir,
    );
    let platform = SystemPlatform::new();

    let outcome = Orchestrator::new(request, policy, &platform, &log)
        .with_expected_sha256(cli.expected_sha256)
        .with_journal(!cli.no_journal)
        .run()
        .await;

    Ok(ExitCode::from(u8::try_from(outcome.exit_code)?))
}
