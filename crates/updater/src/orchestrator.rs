//! One update invocation as an explicit, linear state machine.
//!
//! `Start -> HealthChecked -> Authenticated -> RecordFetched -> RecordMerged
//! -> RecordWritten -> Done`. Any step may end the run in `Failed(stage, reason)`,
//! where `stage` is the state the run was trying to reach.

use std::fmt;

use avatar_core::{merge_blobs, new_ulid, BlobPair, BlobTable, HourKey, UpdateError};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::{Ack, ProfileApi};
use crate::health::{Health, HealthCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    HealthChecked,
    Authenticated,
    RecordFetched,
    RecordMerged,
    RecordWritten,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "Start",
            Stage::HealthChecked => "HealthChecked",
            Stage::Authenticated => "Authenticated",
            Stage::RecordFetched => "RecordFetched",
            Stage::RecordMerged => "RecordMerged",
            Stage::RecordWritten => "RecordWritten",
            Stage::Done => "Done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub stage: Stage,
    pub error: UpdateError,
}

impl Failure {
    pub fn new(stage: Stage, error: UpdateError) -> Self {
        Self { stage, error }
    }

    pub fn reason(&self) -> &'static str {
        self.error.reason()
    }

    /// Process exit status: distinct per failing stage, conflicts apart from other write failures.
    pub fn exit_code(&self) -> u8 {
        match (self.stage, &self.error) {
            (Stage::RecordWritten, UpdateError::Conflict(_)) => 8,
            (Stage::Start, _) => 2,
            (Stage::HealthChecked, _) => 3,
            (Stage::Authenticated, _) => 4,
            (Stage::RecordFetched, _) => 5,
            (Stage::RecordMerged, _) => 6,
            (Stage::RecordWritten, _) => 7,
            (Stage::Done, _) => 1,
        }
    }

    /// Emits the single failure line for this run.
    pub fn log(&self) {
        error!(stage = %self.stage, reason = self.reason(), "update failed: {}", self.error);
        if matches!(self.error, UpdateError::Conflict(_)) {
            warn!("profile changed remotely during the update; another writer may be active");
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage={} reason={}: {}", self.stage, self.reason(), self.error)
    }
}

impl std::error::Error for Failure {}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub hour: HourKey,
    pub blobs: BlobPair,
    pub ack: Ack,
}

/// Drives one update through the health probe and the profile API.
pub struct UpdateOrchestrator<H, P> {
    health: H,
    profile: P,
    handle: String,
    password: String,
    did: Option<String>,
    update_banner: bool,
}

impl<H: HealthCheck, P: ProfileApi> UpdateOrchestrator<H, P> {
    pub fn new(health: H, profile: P, handle: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            health,
            profile,
            handle: handle.into(),
            password: password.into(),
            did: None,
            update_banner: false,
        }
    }

    /// Target repo; defaults to the DID of the authenticated session.
    pub fn with_did(mut self, did: Option<String>) -> Self {
        self.did = did;
        self
    }

    pub fn with_banner(mut self, update_banner: bool) -> Self {
        self.update_banner = update_banner;
        self
    }

    pub fn health(&self) -> &H {
        &self.health
    }

    pub fn profile(&self) -> &P {
        &self.profile
    }

    /// Runs once for `hour`. Logs a single success or failure line; never retries.
    pub async fn run(&self, table: &BlobTable, hour: HourKey) -> Result<RunReport, Failure> {
        let span = info_span!("update", run_id = %new_ulid(), hour = %hour);
        let res = self.steps(table, hour).instrument(span.clone()).await;
        let _enter = span.enter();
        match &res {
            Ok(report) => info!(
                stage = %Stage::Done,
                avatar = %report.blobs.avatar.cid,
                banner = report.blobs.banner.as_ref().map(|b| b.cid.as_str()).unwrap_or("-"),
                cid = %report.ack.cid,
                "profile updated"
            ),
            Err(failure) => failure.log(),
        }
        res
    }

    async fn steps(&self, table: &BlobTable, hour: HourKey) -> Result<RunReport, Failure> {
        info!("starting avatar update");
        let blobs = table
            .resolve(hour, self.update_banner)
            .map_err(|e| Failure::new(Stage::Start, e))?;
        debug!("resolved avatar {} for hour {hour}", blobs.avatar.cid);

        match self.health.check().await {
            Health::Healthy { version } => {
                debug!("endpoint healthy (version {})", version.as_deref().unwrap_or("unknown"));
            }
            Health::Unhealthy(why) => {
                return Err(Failure::new(
                    Stage::HealthChecked,
                    UpdateError::HealthCheck(why),
                ));
            }
        }

        let session = self
            .profile
            .authenticate(&self.handle, &self.password)
            .await
            .map_err(|e| Failure::new(Stage::Authenticated, e))?;
        let did = self.did.clone().unwrap_or_else(|| session.did.clone());
        debug!("authenticated as {} for repo {did}", session.handle);

        let current = self
            .profile
            .fetch_record(&did, &session)
            .await
            .map_err(|e| Failure::new(Stage::RecordFetched, e))?;

        let merged = merge_blobs(&current, &blobs);
        if merged.record_type().is_none() {
            return Err(Failure::new(
                Stage::RecordMerged,
                UpdateError::Config("merged record lacks a type discriminator".into()),
            ));
        }

        let ack = self
            .profile
            .replace_record(&did, &session, &merged)
            .await
            .map_err(|e| Failure::new(Stage::RecordWritten, e))?;

        Ok(RunReport { hour, blobs, ack })
    }
}
