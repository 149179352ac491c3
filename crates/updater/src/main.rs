use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use avatar_core::{HourKey, UpdateError};
use avatar_updater::config::{endpoint_from, env_lookup, Config, LocalPaths};
use avatar_updater::health::{Health, HealthCheck, HttpHealthChecker};
use avatar_updater::logging::{LogConfig, LogManager, RotationPolicy};
use avatar_updater::orchestrator::{Failure, Stage};
use avatar_updater::run_once;
use avatar_updater::schedule::{Registration, ScheduleEntry, ScheduleInstaller, UserCrontab};
use chrono::TimeDelta;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

const DEFAULT_ENV_FILE: &str = "assets/.env";

#[derive(Debug, Parser)]
#[command(name = "avatar-updater", version, about = "Rotate the profile avatar once per hour")]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Cmd>,

    /// JSON table mapping "00".."23" to blob CIDs.
    #[arg(long, global = true, default_value = "assets/cids.json")]
    blobs: PathBuf,

    #[arg(long, global = true, default_value = "avatar_update.log")]
    log_file: PathBuf,

    /// KEY=VALUE file with ENDPOINT, HANDLE, PASSWORD, DID, UPDATE_BANNER.
    /// Sourced by the cron entry too. Defaults to `assets/.env` when that exists.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Skip the crontab check on `run`.
    #[arg(long, global = true)]
    no_schedule: bool,

    /// Per-request timeout for session, fetch and write calls.
    #[arg(long, global = true, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: u64,

    #[arg(long, global = true, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    health_timeout_secs: u64,

    /// Minute past the hour for the cron entry.
    #[arg(long, global = true, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=59))]
    schedule_minute: u8,

    #[arg(long, global = true, default_value_t = 5 * 1024 * 1024)]
    log_max_bytes: u64,

    #[arg(long, global = true, default_value_t = 5)]
    log_max_backups: usize,

    #[arg(long, global = true, default_value_t = 14, value_parser = clap::value_parser!(i64).range(1..=3650))]
    log_rotate_days: i64,

    #[arg(long, global = true, default_value_t = 30, value_parser = clap::value_parser!(i64).range(1..=3650))]
    log_max_age_days: i64,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Cmd {
    /// Update the avatar for the current local hour (default).
    Run,
    /// Register the hourly cron entry and exit.
    Install,
    /// Probe the endpoint and exit.
    Health,
}

impl Cli {
    fn log_config(&self, cwd: &Path) -> LogConfig {
        let mut cfg = LogConfig::new(make_abs(cwd, &self.log_file));
        cfg.policy = RotationPolicy {
            max_bytes: self.log_max_bytes,
            interval: TimeDelta::days(self.log_rotate_days),
            max_backups: self.log_max_backups,
            max_age: TimeDelta::days(self.log_max_age_days),
        };
        cfg
    }

    fn env_file(&self, cwd: &Path) -> Option<PathBuf> {
        match &self.env_file {
            Some(p) => Some(make_abs(cwd, p)),
            None => Some(cwd.join(DEFAULT_ENV_FILE)).filter(|p| p.is_file()),
        }
    }

    fn schedule_entry(&self, cwd: &Path) -> anyhow::Result<ScheduleEntry> {
        let exe = std::env::current_exe().context("locate own executable")?;
        let args = vec![
            "run".to_string(),
            "--no-schedule".to_string(),
            "--blobs".to_string(),
            make_abs(cwd, &self.blobs).display().to_string(),
            "--log-file".to_string(),
            make_abs(cwd, &self.log_file).display().to_string(),
        ];
        Ok(ScheduleEntry::hourly(exe)
            .with_args(args)
            .with_minute(self.schedule_minute)
            .with_env_file(self.env_file(cwd)))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().unwrap_or_default();

    let _logs = match LogManager::init(&cli.log_config(&cwd)) {
        Ok(logs) => logs,
        Err(e) => {
            eprintln!("avatar-updater: cannot initialize logging: {e:#}");
            return ExitCode::from(1);
        }
    };

    match cli.cmd.unwrap_or(Cmd::Run) {
        Cmd::Run => run(&cli, &cwd).await,
        Cmd::Install => match install(&cli, &cwd) {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!("schedule registration failed: {e:#}");
                ExitCode::from(1)
            }
        },
        Cmd::Health => health(&cli, &cwd).await,
    }
}

async fn run(cli: &Cli, cwd: &Path) -> ExitCode {
    if !cli.no_schedule {
        if let Err(e) = install(cli, cwd) {
            warn!("schedule registration failed, continuing: {e:#}");
        }
    }

    let local = LocalPaths {
        blobs_path: make_abs(cwd, &cli.blobs),
        request_timeout: Duration::from_secs(cli.timeout_secs),
        health_timeout: Duration::from_secs(cli.health_timeout_secs),
    };
    let cfg = match Config::load(cli.env_file(cwd).as_deref(), local) {
        Ok(cfg) => cfg,
        Err(e) => {
            let failure = Failure::new(Stage::Start, e);
            failure.log();
            return ExitCode::from(failure.exit_code());
        }
    };

    match run_once(&cfg, HourKey::now_local()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(failure) => ExitCode::from(failure.exit_code()),
    }
}

fn install(cli: &Cli, cwd: &Path) -> anyhow::Result<Registration> {
    let entry = cli.schedule_entry(cwd)?;
    ScheduleInstaller::new(UserCrontab).ensure_registered(&entry)
}

async fn health(cli: &Cli, cwd: &Path) -> ExitCode {
    let endpoint = match env_lookup(cli.env_file(cwd).as_deref()).and_then(endpoint_from) {
        Ok(u) => u,
        Err(e) => {
            let failure = Failure::new(Stage::Start, e);
            failure.log();
            return ExitCode::from(failure.exit_code());
        }
    };
    let checker =
        HttpHealthChecker::new(endpoint.clone(), Duration::from_secs(cli.health_timeout_secs));
    match checker.check().await {
        Health::Healthy { version } => {
            info!(
                "{endpoint} is healthy (version {})",
                version.as_deref().unwrap_or("unknown")
            );
            ExitCode::SUCCESS
        }
        Health::Unhealthy(why) => {
            let failure = Failure::new(
                Stage::HealthChecked,
                UpdateError::HealthCheck(format!("{endpoint}: {why}")),
            );
            failure.log();
            ExitCode::from(failure.exit_code())
        }
    }
}

fn make_abs(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}
