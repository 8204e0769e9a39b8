use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::OrgSignalError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Analysis backend
    pub backend_url: String,
    pub backend_token: Option<String>,

    // Opportunity scoring service; defaults to the backend host
    pub opportunity_url: String,

    // Persistence adapter; None means the in-memory store
    pub persistence_url: Option<String>,

    // Deadlines
    pub stage_timeout: Duration,
    pub collector_timeout: Duration,

    // Cache
    pub analysis_ttl: Duration,
    pub lookup_ttl: Duration,
    pub cache_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, OrgSignalError> {
        let backend_url = required_env("ORGSIGNAL_BACKEND_URL")?;
        let opportunity_url =
            env::var("ORGSIGNAL_OPPORTUNITY_URL").unwrap_or_else(|_| backend_url.clone());

        Ok(Self {
            backend_token: optional_env("ORGSIGNAL_BACKEND_TOKEN"),
            opportunity_url,
            persistence_url: optional_env("ORGSIGNAL_PERSISTENCE_URL"),
            stage_timeout: Duration::from_secs(parsed_env("ORGSIGNAL_STAGE_TIMEOUT_SECS", 120)?),
            collector_timeout: Duration::from_secs(parsed_env(
                "ORGSIGNAL_COLLECTOR_TIMEOUT_SECS",
                45,
            )?),
            analysis_ttl: Duration::from_secs(parsed_env("ORGSIGNAL_ANALYSIS_TTL_SECS", 300)?),
            lookup_ttl: Duration::from_secs(parsed_env("ORGSIGNAL_LOOKUP_TTL_SECS", 60)?),
            cache_capacity: parsed_env("ORGSIGNAL_CACHE_CAPACITY", 100)?,
            backend_url,
        })
    }

    /// Log the effective configuration with secrets redacted.
    pub fn log_redacted(&self) {
        info!(
            backend_url = self.backend_url.as_str(),
            backend_token = if self.backend_token.is_some() { "[set]" } else { "[unset]" },
            opportunity_url = self.opportunity_url.as_str(),
            persistence = self.persistence_url.as_deref().unwrap_or("in-memory"),
            stage_timeout_secs = self.stage_timeout.as_secs(),
            collector_timeout_secs = self.collector_timeout.as_secs(),
            analysis_ttl_secs = self.analysis_ttl.as_secs(),
            lookup_ttl_secs = self.lookup_ttl.as_secs(),
            cache_capacity = self.cache_capacity,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> Result<String, OrgSignalError> {
    env::var(key).map_err(|_| OrgSignalError::Config(format!("{key} environment variable is required")))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T, OrgSignalError> {
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| OrgSignalError::Config(format!("{key} must be a number, got '{raw}'"))),
        None => Ok(default),
    }
}
