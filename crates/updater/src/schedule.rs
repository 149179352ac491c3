use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

/// Read/replace access to a crontab-style registration store.
pub trait CronStore {
    /// Current lines, comments included.
    fn read(&self) -> Result<Vec<String>>;
    /// Replaces the whole store.
    fn write(&self, lines: &[String]) -> Result<()>;
}

/// The invoking user's crontab, through the `crontab` binary.
#[derive(Debug, Clone, Default)]
pub struct UserCrontab;

impl CronStore for UserCrontab {
    fn read(&self) -> Result<Vec<String>> {
        let out = Command::new("crontab")
            .arg("-l")
            .output()
            .context("run crontab -l")?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if stderr.contains("no crontab") {
                return Ok(vec![]);
            }
            return Err(anyhow!("crontab -l failed: {}", stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn write(&self, lines: &[String]) -> Result<()> {
        let mut child = Command::new("crontab")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawn crontab -")?;
        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| anyhow!("crontab stdin unavailable"))?;
            for line in lines {
                writeln!(stdin, "{line}").context("write crontab")?;
            }
        }
        let out = child.wait_with_output().context("wait crontab -")?;
        if !out.status.success() {
            return Err(anyhow!(
                "crontab - failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(())
    }
}

/// Desired hourly registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// Absolute path of the binary; the identity used for idempotence.
    pub command: PathBuf,
    pub args: Vec<String>,
    /// Minute past the hour, 0..=59.
    pub minute: u8,
    /// Sourced (with `set -a`) before the command so cron sees the credentials.
    pub env_file: Option<PathBuf>,
}

impl ScheduleEntry {
    pub fn hourly(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: vec!["run".into()],
            minute: 0,
            env_file: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_minute(mut self, minute: u8) -> Self {
        self.minute = minute.min(59);
        self
    }

    pub fn with_env_file(mut self, env_file: Option<PathBuf>) -> Self {
        self.env_file = env_file;
        self
    }

    /// The crontab line for this entry.
    pub fn render(&self) -> String {
        let mut line = format!("{} * * * * ", self.minute);
        if let Some(env) = &self.env_file {
            line.push_str(&format!("set -a; . {}; set +a; ", sh_quote_path(env)));
        }
        line.push_str(&sh_quote_path(&self.command));
        for a in &self.args {
            line.push(' ');
            line.push_str(&sh_quote(a));
        }
        line
    }

    /// Whether an observed line already runs this command.
    ///
    /// Compares the unquoted command word of every `;`-separated command on the
    /// line, so quoted paths match and longer paths sharing a prefix do not.
    pub fn matches(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return false;
        }
        let schedule_fields = if line.starts_with('@') { 1 } else { 5 };
        let mut at_command = true;
        for word in shell_words(line).into_iter().skip(schedule_fields) {
            match word {
                Word::Separator => at_command = true,
                Word::Text(w) => {
                    if at_command && Path::new(&w) == self.command.as_path() {
                        return true;
                    }
                    at_command = false;
                }
            }
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Word {
    Text(String),
    Separator,
}

/// Splits a `/bin/sh` command line into words, undoing quotes and escapes.
fn shell_words(line: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut in_word = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    cur.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => cur.extend(chars.next()),
                        _ => cur.push(q),
                    }
                }
            }
            '\\' => {
                in_word = true;
                cur.extend(chars.next());
            }
            ';' => {
                if in_word {
                    words.push(Word::Text(std::mem::take(&mut cur)));
                    in_word = false;
                }
                words.push(Word::Separator);
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(Word::Text(std::mem::take(&mut cur)));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                cur.push(c);
            }
        }
    }
    if in_word {
        words.push(Word::Text(cur));
    }
    words
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    AlreadyRegistered,
    Registered,
}

/// Reconciles the desired entry against what the store holds.
#[derive(Debug, Clone, Default)]
pub struct ScheduleInstaller<S> {
    store: S,
}

impl<S: CronStore> ScheduleInstaller<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds `entry` unless a registration for the same command already exists.
    pub fn ensure_registered(&self, entry: &ScheduleEntry) -> Result<Registration> {
        let observed = self.store.read().context("read existing registrations")?;
        if let Some(existing) = observed.iter().find(|l| entry.matches(l)) {
            debug!("already scheduled: {existing}");
            return Ok(Registration::AlreadyRegistered);
        }

        let mut desired = observed;
        desired.push(entry.render());
        self.store.write(&desired).context("write registrations")?;
        info!("registered hourly run: {}", entry.render());
        Ok(Registration::Registered)
    }
}

fn sh_quote_path(p: &Path) -> String {
    sh_quote(&p.to_string_lossy())
}

/// Single-quotes `s` for `/bin/sh` when it contains anything but safe characters.
fn sh_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,+@%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
