//! Hourly avatar updater: picks this hour's blob and writes it into the profile record.

pub mod client;
pub mod config;
pub mod health;
pub mod logging;
pub mod orchestrator;
pub mod schedule;

use avatar_core::{BlobTable, HourKey};

use crate::client::ProfileClient;
use crate::config::Config;
use crate::health::HttpHealthChecker;
use crate::orchestrator::{Failure, RunReport, Stage, UpdateOrchestrator};

/// Builds the real HTTP collaborators from `cfg`.
pub fn build_orchestrator(
    cfg: &Config,
) -> Result<UpdateOrchestrator<HttpHealthChecker, ProfileClient>, Failure> {
    let creds = &cfg.credentials;
    let health = HttpHealthChecker::new(creds.endpoint.clone(), cfg.health_timeout);
    let profile = ProfileClient::new(creds.endpoint.clone(), cfg.request_timeout)
        .map_err(|e| Failure::new(Stage::Start, e))?;
    Ok(
        UpdateOrchestrator::new(health, profile, creds.handle.clone(), creds.password.clone())
            .with_did(creds.did.clone())
            .with_banner(cfg.update_banner),
    )
}

/// Loads the blob table and runs one update for `hour` against the configured PDS.
pub async fn run_once(cfg: &Config, hour: HourKey) -> Result<RunReport, Failure> {
    let prepared = BlobTable::load(&cfg.blobs_path)
        .map_err(|e| Failure::new(Stage::Start, e))
        .and_then(|table| Ok((table, build_orchestrator(cfg)?)));
    let (table, orchestrator) = match prepared {
        Ok(p) => p,
        Err(failure) => {
            failure.log();
            return Err(failure);
        }
    };
    orchestrator.run(&table, hour).await
}
