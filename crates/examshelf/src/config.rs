//! Ingestion service configuration.
//!
//! Loaded from a JSON file; every field has a default so an empty
//! object is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum number of jobs processed concurrently.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Hard deadline for a single job, in seconds.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Timeout for fetching a single remote source.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Timeout for the extraction service health probe.
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,
    /// Age after which a pending/processing job counts as abandoned.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Interval between reconciliation sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Run the stale-job sweep every Nth reconciliation tick.
    #[serde(default = "default_stale_sweep_every")]
    pub stale_sweep_every: u32,
    /// Prefix for artifact keys in the object store.
    #[serde(default = "default_artifact_key_prefix")]
    pub artifact_key_prefix: String,
    /// Buffer size of the progress broadcast channel.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_job_timeout_secs() -> u64 {
    1800
}

fn default_fetch_timeout_secs() -> u64 {
    120
}

fn default_health_check_timeout_secs() -> u64 {
    5
}

fn default_stale_after_secs() -> u64 {
    86_400
}

fn default_sweep_interval_secs() -> u64 {
    120
}

fn default_stale_sweep_every() -> u32 {
    15
}

fn default_artifact_key_prefix() -> String {
    "ingest".to_string()
}

fn default_broadcast_capacity() -> usize {
    100
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: default_job_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_sweep_every: default_stale_sweep_every(),
            artifact_key_prefix: default_artifact_key_prefix(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngestConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<IngestConfig, ConfigError> {
    let config: IngestConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &IngestConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_jobs == 0 {
        return Err(ConfigError::Validation {
            message: "max_concurrent_jobs must be at least 1".to_string(),
        });
    }
    if config.job_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "job_timeout_secs must be non-zero".to_string(),
        });
    }
    if config.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "sweep_interval_secs must be non-zero".to_string(),
        });
    }
    if config.stale_sweep_every == 0 {
        return Err(ConfigError::Validation {
            message: "stale_sweep_every must be non-zero".to_string(),
        });
    }
    if config.broadcast_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "broadcast_capacity must be non-zero".to_string(),
        });
    }

    Ok(())
}
