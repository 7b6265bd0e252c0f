//! Coordinator configuration
//!
//! Defines every tunable of the coordinator: listen address, storage
//! backends, artifact policy and poll marker caching.

use std::path::PathBuf;
use std::time::Duration;

use kiln_core::domain::token::RunnerToken;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub bind_addr: String,

    /// Postgres URL; `None` runs on in-memory stores
    pub database_url: Option<String>,

    /// Root directory of the filesystem blob store
    pub artifacts_dir: PathBuf,

    /// Base URL downloads are redirected to, if the blob store is public
    pub artifacts_public_url: Option<String>,

    /// Administrative switch for the whole artifact lifecycle
    pub artifacts_enabled: bool,

    /// Ceiling for a single artifact archive, in bytes
    pub max_artifact_size: u64,

    /// Expiry applied when an upload does not request one
    pub default_artifact_expiry: Duration,

    /// Lifetime of a poll marker
    pub poll_marker_ttl: Duration,

    /// When false, every empty poll gets a fresh marker
    pub poll_marker_cache: bool,

    /// Pre-provisioned runner credentials as (token, description)
    pub runner_tokens: Vec<(RunnerToken, String)>,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - KILN_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL (default: unset, in-memory stores)
    /// - KILN_ARTIFACTS_DIR (default: ./artifacts)
    /// - KILN_ARTIFACTS_PUBLIC_URL (default: unset)
    /// - KILN_ARTIFACTS_ENABLED (default: true)
    /// - KILN_MAX_ARTIFACT_SIZE (bytes, default: 100 MiB)
    /// - KILN_DEFAULT_ARTIFACT_EXPIRY (seconds, default: 30 days)
    /// - KILN_POLL_MARKER_TTL (seconds, default: 3600)
    /// - KILN_POLL_MARKER_CACHE (default: true)
    /// - KILN_RUNNER_TOKENS (comma separated `token` or `token:description`)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = std::env::var("KILN_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let artifacts_dir = std::env::var("KILN_ARTIFACTS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.artifacts_dir);

        let artifacts_public_url = std::env::var("KILN_ARTIFACTS_PUBLIC_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let artifacts_enabled = std::env::var("KILN_ARTIFACTS_ENABLED")
            .ok()
            .map(|s| parse_bool(&s))
            .transpose()?
            .unwrap_or(defaults.artifacts_enabled);

        let max_artifact_size = std::env::var("KILN_MAX_ARTIFACT_SIZE")
            .ok()
            .map(|s| parse_u64("KILN_MAX_ARTIFACT_SIZE", &s))
            .transpose()?
            .unwrap_or(defaults.max_artifact_size);

        let default_artifact_expiry = std::env::var("KILN_DEFAULT_ARTIFACT_EXPIRY")
            .ok()
            .map(|s| parse_u64("KILN_DEFAULT_ARTIFACT_EXPIRY", &s))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_artifact_expiry);

        let poll_marker_ttl = std::env::var("KILN_POLL_MARKER_TTL")
            .ok()
            .map(|s| parse_u64("KILN_POLL_MARKER_TTL", &s))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_marker_ttl);

        let poll_marker_cache = std::env::var("KILN_POLL_MARKER_CACHE")
            .ok()
            .map(|s| parse_bool(&s))
            .transpose()?
            .unwrap_or(defaults.poll_marker_cache);

        let runner_tokens = match std::env::var("KILN_RUNNER_TOKENS") {
            Ok(raw) => parse_runner_tokens(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            bind_addr,
            database_url,
            artifacts_dir,
            artifacts_public_url,
            artifacts_enabled,
            max_artifact_size,
            default_artifact_expiry,
            poll_marker_ttl,
            poll_marker_cache,
            runner_tokens,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("DATABASE_URL must start with postgres:// or postgresql://");
            }
        }

        if let Some(url) = &self.artifacts_public_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("artifacts_public_url must start with http:// or https://");
            }
        }

        if self.max_artifact_size == 0 {
            anyhow::bail!("max_artifact_size must be greater than 0");
        }

        if self.poll_marker_ttl.is_zero() {
            anyhow::bail!("poll_marker_ttl must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            artifacts_dir: PathBuf::from("./artifacts"),
            artifacts_public_url: None,
            artifacts_enabled: true,
            max_artifact_size: 100 * 1024 * 1024,
            default_artifact_expiry: Duration::from_secs(30 * 24 * 60 * 60),
            poll_marker_ttl: Duration::from_secs(60 * 60),
            poll_marker_cache: true,
            runner_tokens: Vec::new(),
        }
    }
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("invalid boolean value: {}", other),
    }
}

fn parse_u64(var: &str, raw: &str) -> anyhow::Result<u64> {
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value for {}: {:?} ({})", var, raw, e))
}

fn parse_runner_tokens(raw: &str) -> anyhow::Result<Vec<(RunnerToken, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, description) = entry.split_once(':').unwrap_or((entry, ""));
            let token = RunnerToken::parse(token)
                .map_err(|e| anyhow::anyhow!("invalid runner token in KILN_RUNNER_TOKENS: {}", e))?;
            let description = if description.trim().is_empty() {
                "provisioned runner".to_string()
            } else {
                description.trim().to_string()
            };
            Ok((token, description))
        })
        .collect()
}
