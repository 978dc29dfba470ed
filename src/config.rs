//! Rebooter configuration.
//!
//! Loaded from the TOML file named on the command line:
//!
//! ```toml
//! [main]
//! slaveapi_server = "http://slaveapi.example.com:8080"
//! workers = 8
//! verbose = false
//!
//! [exclude]
//! win10 = ""
//! ```
//!
//! Keys under `[exclude]` are substring patterns; their values are ignored.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jiff::SignedDuration;
use reqwest::Url;
use serde::Deserialize;

use crate::exclude::Exclusions;
use crate::policy::DEFAULT_IDLE_THRESHOLD;
use crate::processor::ProcessorSettings;
use crate::slaveapi::RetryPolicy;
use crate::supervisor::{MAX_PROCESSORS, SupervisorSettings};

/// Errors that can occur while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid `{field}` in {}: {reason}", .path.display())]
    Invalid {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },
}

pub type Result<T> = core::result::Result<T, ConfigError>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    main: RawMain,
    #[serde(default)]
    exclude: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMain {
    slaveapi_server: String,
    workers: i64,
    #[serde(default)]
    verbose: bool,
    idle_threshold_secs: Option<i64>,
    graceful_wait_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    retry_attempts: Option<u32>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub slaveapi_server: Url,

    /// Maximum concurrent processor threads, 1 to 16.
    pub workers: usize,

    pub verbose: bool,
    pub idle_threshold: SignedDuration,
    pub graceful_wait: Duration,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub exclusions: Exclusions,
}

impl Config {
    /// Load and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    /// Parse and validate config text. `path` is only used in error messages.
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let invalid = |field, reason: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            field,
            reason,
        };
        let main = raw.main;

        let slaveapi_server = Url::parse(&main.slaveapi_server)
            .map_err(|e| invalid("slaveapi_server", format!("{e}")))?;
        if !matches!(slaveapi_server.scheme(), "http" | "https") {
            return Err(invalid(
                "slaveapi_server",
                format!("expected an http(s) URL, got {}", main.slaveapi_server),
            ));
        }

        let workers = usize::try_from(main.workers)
            .ok()
            .filter(|w| (1..=MAX_PROCESSORS).contains(w))
            .ok_or_else(|| {
                invalid(
                    "workers",
                    format!("must be between 1 and {MAX_PROCESSORS}, got {}", main.workers),
                )
            })?;

        let idle_threshold = match main.idle_threshold_secs {
            None => DEFAULT_IDLE_THRESHOLD,
            Some(secs) if secs > 0 => SignedDuration::from_secs(secs),
            Some(secs) => {
                return Err(invalid("idle_threshold_secs", format!("must be positive, got {secs}")));
            }
        };

        let defaults = ProcessorSettings::default();
        let graceful_wait = match main.graceful_wait_secs {
            None => defaults.graceful_wait,
            Some(0) => return Err(invalid("graceful_wait_secs", "must be positive".to_string())),
            Some(secs) => Duration::from_secs(secs),
        };

        let request_timeout = match main.request_timeout_secs {
            None => Duration::from_secs(60),
            Some(0) => {
                return Err(invalid("request_timeout_secs", "must be positive".to_string()));
            }
            Some(secs) => Duration::from_secs(secs),
        };

        let retry_attempts = match main.retry_attempts {
            None => RetryPolicy::default().attempts,
            Some(0) => return Err(invalid("retry_attempts", "must be at least 1".to_string())),
            Some(n) => n,
        };

        if raw.exclude.contains_key("") {
            return Err(invalid(
                "exclude",
                "empty pattern would exclude every slave".to_string(),
            ));
        }

        Ok(Self {
            slaveapi_server,
            workers,
            verbose: main.verbose,
            idle_threshold,
            graceful_wait,
            request_timeout,
            retry_attempts,
            exclusions: Exclusions::new(raw.exclude.into_keys()),
        })
    }

    pub fn processor_settings(&self, dry_run: bool) -> ProcessorSettings {
        ProcessorSettings {
            idle_threshold: self.idle_threshold,
            graceful_wait: self.graceful_wait,
            dry_run,
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            max_processors: self.workers,
            ..SupervisorSettings::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            ..RetryPolicy::default()
        }
    }
}
