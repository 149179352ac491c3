use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use avatar_core::UpdateError;
use reqwest::Url;

pub const ENV_ENDPOINT: &str = "ENDPOINT";
pub const ENV_HANDLE: &str = "HANDLE";
pub const ENV_PASSWORD: &str = "PASSWORD";
pub const ENV_DID: &str = "DID";
pub const ENV_UPDATE_BANNER: &str = "UPDATE_BANNER";

/// Account credentials. The password never shows up in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub endpoint: Url,
    pub handle: String,
    pub password: String,
    /// When unset, the DID from the session is used.
    pub did: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint.as_str())
            .field("handle", &self.handle)
            .field("password", &"<redacted>")
            .field("did", &self.did)
            .finish()
    }
}

/// Everything one invocation needs, validated up front.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub update_banner: bool,
    pub blobs_path: PathBuf,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
}

/// Settings that come from the command line rather than the environment.
#[derive(Debug, Clone)]
pub struct LocalPaths {
    pub blobs_path: PathBuf,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
}

impl Config {
    /// Reads the process environment, falling back to `env_file` when given.
    pub fn load(env_file: Option<&Path>, local: LocalPaths) -> Result<Self, UpdateError> {
        Self::from_lookup(env_lookup(env_file)?, local)
    }

    /// Builds the config from any key → value source. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F, local: LocalPaths) -> Result<Self, UpdateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| {
                UpdateError::Config(format!("missing environment variable {key}"))
            })
        };

        // Collect every missing key so the operator fixes them in one go.
        let missing: Vec<&str> = [ENV_ENDPOINT, ENV_HANDLE, ENV_PASSWORD]
            .into_iter()
            .filter(|k| get(*k).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(UpdateError::Config(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )));
        }

        let endpoint = parse_endpoint(&require(ENV_ENDPOINT)?)?;
        let did = get(ENV_DID).map(|d| d.trim().to_string());
        if let Some(d) = &did {
            if !d.starts_with("did:") {
                return Err(UpdateError::Config(format!("{ENV_DID} {d:?} is not a DID")));
            }
        }
        let update_banner = match get(ENV_UPDATE_BANNER) {
            Some(v) => parse_bool(ENV_UPDATE_BANNER, &v)?,
            None => false,
        };

        if local.request_timeout.is_zero() || local.health_timeout.is_zero() {
            return Err(UpdateError::Config("timeouts must be non-zero".into()));
        }

        Ok(Self {
            credentials: Credentials {
                endpoint,
                handle: require(ENV_HANDLE)?.trim().to_string(),
                password: require(ENV_PASSWORD)?,
                did,
            },
            update_banner,
            blobs_path: local.blobs_path,
            request_timeout: local.request_timeout,
            health_timeout: local.health_timeout,
        })
    }
}

/// Process environment first, then the variables of `env_file` when given.
pub fn env_lookup(
    env_file: Option<&Path>,
) -> Result<impl Fn(&str) -> Option<String>, UpdateError> {
    let file = match env_file {
        Some(path) => read_env_file(path)?,
        None => HashMap::new(),
    };
    Ok(move |key: &str| {
        std::env::var(key)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| file.get(key).cloned())
    })
}

/// Just the endpoint, for commands that never authenticate.
pub fn endpoint_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Url, UpdateError> {
    let raw = lookup(ENV_ENDPOINT)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| UpdateError::Config(format!("missing environment variable {ENV_ENDPOINT}")))?;
    parse_endpoint(&raw)
}

/// Reads `KEY=VALUE` lines as written for `set -a; . file`.
///
/// Blank lines and `#` comments are skipped; an `export ` prefix and one layer of
/// matching quotes around the value are stripped.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, UpdateError> {
    let text = fs::read_to_string(path)
        .map_err(|e| UpdateError::Config(format!("reading {}: {e}", path.display())))?;
    let mut vars = HashMap::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(UpdateError::Config(format!(
                "{}:{}: expected KEY=VALUE",
                path.display(),
                n + 1
            )));
        };
        vars.insert(key.trim().to_string(), unquote(value.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(v: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = v.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    v
}

/// Parses the service endpoint; a bare host gets `https://`.
pub fn parse_endpoint(raw: &str) -> Result<Url, UpdateError> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| UpdateError::Config(format!("{ENV_ENDPOINT} {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(UpdateError::Config(format!(
            "{ENV_ENDPOINT} scheme {other:?} is not http(s)"
        ))),
    }
}

pub fn parse_bool(key: &str, raw: &str) -> Result<bool, UpdateError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(UpdateError::Config(format!(
            "{key} {other:?} is not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn local() -> LocalPaths {
        LocalPaths {
            blobs_path: "cids.json".into(),
            request_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
        }
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn reads_all_fields() {
        let cfg = Config::from_lookup(
            env(&[
                ("ENDPOINT", "bsky.social"),
                ("HANDLE", "me.bsky.social"),
                ("PASSWORD", "xxxx-xxxx"),
                ("DID", "did:plc:abc"),
                ("UPDATE_BANNER", "yes"),
            ]),
            local(),
        )
        .unwrap();
        assert_eq!(cfg.credentials.endpoint.as_str(), "https://bsky.social/");
        assert_eq!(cfg.credentials.did.as_deref(), Some("did:plc:abc"));
        assert!(cfg.update_banner);
        assert!(!format!("{cfg:?}").contains("xxxx-xxxx"));
    }

    #[test]
    fn lists_every_missing_variable() {
        let err = Config::from_lookup(env(&[("HANDLE", "  ")]), local()).unwrap_err();
        let UpdateError::Config(msg) = err else {
            panic!("expected config error")
        };
        assert!(msg.contains("ENDPOINT") && msg.contains("HANDLE") && msg.contains("PASSWORD"));
    }

    #[test]
    fn reads_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(
            &path,
            "# avatar updater\nexport ENDPOINT=https://pds.example\nHANDLE='me.example'\n\nPASSWORD=\"a b=c\"\n",
        )
        .unwrap();
        let vars = read_env_file(&path).unwrap();
        assert_eq!(vars["ENDPOINT"], "https://pds.example");
        assert_eq!(vars["HANDLE"], "me.example");
        assert_eq!(vars["PASSWORD"], "a b=c");

        fs::write(&path, "not a pair\n").unwrap();
        assert!(read_env_file(&path).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        let base = [
            ("ENDPOINT", "https://pds.example"),
            ("HANDLE", "h"),
            ("PASSWORD", "p"),
        ];
        let mut with_banner = base.to_vec();
        with_banner.push(("UPDATE_BANNER", "maybe"));
        assert!(Config::from_lookup(env(&with_banner), local()).is_err());

        let mut with_did = base.to_vec();
        with_did.push(("DID", "me.bsky.social"));
        assert!(Config::from_lookup(env(&with_did), local()).is_err());

        assert!(parse_endpoint("ftp://pds.example").is_err());
        assert!(!Config::from_lookup(env(&base), local()).unwrap().update_banner);
    }
}
