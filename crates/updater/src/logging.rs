//! Process-wide logging: console plus a rotating, pruned log file.
//!
//! `LogManager::init` installs the global `tracing` subscriber exactly once and
//! returns the handle that owns the file. Keep it alive for the whole process;
//! dropping it flushes the file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const BACKUP_TS_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// When to rotate and what to keep afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once the active file would grow past this many bytes.
    pub max_bytes: u64,
    /// Rotate once the active file is this old.
    pub interval: TimeDelta,
    /// Rotated files kept, newest first.
    pub max_backups: usize,
    /// Rotated files older than this are deleted regardless of count.
    pub max_age: TimeDelta,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            interval: TimeDelta::days(14),
            max_backups: 5,
            max_age: TimeDelta::days(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub file: PathBuf,
    pub policy: RotationPolicy,
    /// Console filter directive, overridden by `RUST_LOG`.
    pub console_level: String,
    pub file_level: String,
}

impl LogConfig {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            policy: RotationPolicy::default(),
            console_level: "info".into(),
            file_level: "debug".into(),
        }
    }
}

/// Handle owning the log file for the lifetime of the process.
pub struct LogManager {
    file: RotatingFile,
}

impl LogManager {
    pub fn init(cfg: &LogConfig) -> Result<Self> {
        let file = RotatingFile::open(&cfg.file, cfg.policy.clone())?;

        let console_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&cfg.console_level));
        let console = fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .with_filter(console_filter);
        let logfile = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(file.clone())
            .with_filter(EnvFilter::new(&cfg.file_level));

        tracing_subscriber::registry()
            .with(console)
            .with(logfile)
            .try_init()
            .context("install tracing subscriber")?;

        Ok(Self { file })
    }

    pub fn file(&self) -> &RotatingFile {
        &self.file
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        let _ = self.file.clone().flush();
    }
}

/// Append-only log file with time/size rotation and age/count pruning.
///
/// Cheap to clone; clones share the same file.
#[derive(Debug, Clone)]
pub struct RotatingFile {
    inner: Arc<Mutex<Active>>,
}

#[derive(Debug)]
struct Active {
    path: PathBuf,
    policy: RotationPolicy,
    file: File,
    size: u64,
    started: DateTime<Utc>,
    last_prune: DateTime<Utc>,
}

impl RotatingFile {
    /// Opens (or creates) `path` for appending and prunes stale backups.
    pub fn open(path: &Path, policy: RotationPolicy) -> Result<Self> {
        Self::open_at(path, policy, Utc::now())
    }

    pub(crate) fn open_at(path: &Path, policy: RotationPolicy, now: DateTime<Utc>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let file = open_append(path).with_context(|| format!("open {}", path.display()))?;
        let meta = file.metadata().with_context(|| format!("stat {}", path.display()))?;
        let started = if meta.len() == 0 {
            now
        } else {
            // Segment start survives restarts through the file's own timestamps.
            meta.created()
                .or_else(|_| meta.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or(now)
        };
        let mut active = Active {
            path: path.to_path_buf(),
            policy,
            file,
            size: meta.len(),
            started,
            last_prune: now,
        };
        active
            .prune(now)
            .with_context(|| format!("prune backups of {}", path.display()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(active)),
        })
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Active>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))
    }

    pub(crate) fn write_at(&self, buf: &[u8], now: DateTime<Utc>) -> io::Result<usize> {
        let mut active = self.lock()?;
        if active.due(buf.len() as u64, now) {
            active.rotate(now)?;
        } else if now - active.last_prune >= TimeDelta::hours(1) {
            active.prune(now)?;
        }
        active.file.write_all(buf)?;
        active.size += buf.len() as u64;
        Ok(buf.len())
    }

    /// Rotated files currently on disk, newest first.
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        let active = self.lock()?;
        Ok(active.backups()?.into_iter().map(|b| b.path).collect())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(buf, Utc::now())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

struct Backup {
    path: PathBuf,
    rotated_at: DateTime<Utc>,
    seq: u32,
}

impl Active {
    fn due(&self, incoming: u64, now: DateTime<Utc>) -> bool {
        if self.size == 0 {
            return false;
        }
        self.size + incoming > self.policy.max_bytes || now - self.started >= self.policy.interval
    }

    fn rotate(&mut self, now: DateTime<Utc>) -> io::Result<()> {
        self.file.flush()?;
        let target = self.free_backup_name(now)?;
        fs::rename(&self.path, &target)?;
        self.file = open_append(&self.path)?;
        self.size = 0;
        self.started = now;
        self.prune(now)
    }

    /// Same-second rotations get increasing sequence numbers so the newest
    /// always sorts first.
    fn free_backup_name(&self, now: DateTime<Utc>) -> io::Result<PathBuf> {
        let stamp = now.format(BACKUP_TS_FORMAT).to_string();
        let base = format!("{}.{stamp}", self.file_name());
        let rotated_at = parse_backup_suffix(&stamp).map(|(t, _)| t);
        let last_seq = self
            .backups()?
            .iter()
            .filter(|b| Some(b.rotated_at) == rotated_at)
            .map(|b| b.seq)
            .max();
        let name = match last_seq {
            None => base,
            Some(seq) => format!("{base}.{}", seq + 1),
        };
        Ok(self.dir().join(name))
    }

    /// Age first, then count; the two limits are applied independently.
    fn prune(&mut self, now: DateTime<Utc>) -> io::Result<()> {
        self.last_prune = now;
        let listed = self.backups()?;
        self.prune_listed(listed, now)
    }

    /// `listed` must be newest first. Another run may already have removed some of them.
    fn prune_listed(&self, listed: Vec<Backup>, now: DateTime<Utc>) -> io::Result<()> {
        let mut kept = Vec::new();
        for b in listed {
            if now - b.rotated_at > self.policy.max_age {
                remove_backup(&b.path)?;
            } else {
                kept.push(b);
            }
        }
        for b in kept.into_iter().skip(self.policy.max_backups) {
            remove_backup(&b.path)?;
        }
        Ok(())
    }

    /// Newest first.
    fn backups(&self) -> io::Result<Vec<Backup>> {
        let prefix = format!("{}.", self.file_name());
        let mut found = Vec::new();
        for entry in fs::read_dir(self.dir())? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
                continue;
            };
            if let Some((rotated_at, seq)) = parse_backup_suffix(suffix) {
                found.push(Backup {
                    path: entry.path(),
                    rotated_at,
                    seq,
                });
            }
        }
        found.sort_by(|a, b| (b.rotated_at, b.seq).cmp(&(a.rotated_at, a.seq)));
        Ok(found)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

fn remove_backup(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `20240101T000000Z` or `20240101T000000Z.3`.
fn parse_backup_suffix(suffix: &str) -> Option<(DateTime<Utc>, u32)> {
    let (ts, seq) = match suffix.split_once('.') {
        Some((ts, seq)) => (ts, seq.parse().ok()?),
        None => (suffix, 0),
    };
    let naive = NaiveDateTime::parse_from_str(ts, BACKUP_TS_FORMAT).ok()?;
    Some((naive.and_utc(), seq))
}
