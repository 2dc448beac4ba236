use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::jobs::worker::WorkerConfig;
use crate::pipeline::DEFAULT_CHUNK_SIZE;

/// Runtime settings, read from a TOML file. Every field has a default, so an
/// empty (or missing) file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file path, or `:memory:`
    pub database: String,
    pub ingest: IngestConfig,
    pub resolution: ResolutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Source rows per insert batch
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further one
    pub retry_backoff_ms: u64,
    pub queue_capacity: usize,
    /// Jobs for different tables allowed to run at once
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "mapdata.db".to_string(),
            ingest: IngestConfig::default(),
            resolution: ResolutionConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        let worker = WorkerConfig::default();
        Self {
            max_attempts: worker.max_attempts,
            retry_backoff_ms: worker.retry_backoff.as_millis() as u64,
            queue_capacity: worker.queue_capacity,
            concurrency: worker.concurrency,
        }
    }
}

impl Config {
    /// Load and validate `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.trim().is_empty() {
            anyhow::bail!("database must not be empty");
        }
        if self.ingest.chunk_size == 0 {
            anyhow::bail!("ingest.chunk_size must be at least 1");
        }
        if self.resolution.max_attempts == 0 {
            anyhow::bail!("resolution.max_attempts must be at least 1");
        }
        if self.resolution.queue_capacity == 0 {
            anyhow::bail!("resolution.queue_capacity must be at least 1");
        }
        if self.resolution.concurrency == 0 {
            anyhow::bail!("resolution.concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_attempts: self.resolution.max_attempts,
            retry_backoff: Duration::from_millis(self.resolution.retry_backoff_ms),
            queue_capacity: self.resolution.queue_capacity,
            concurrency: self.resolution.concurrency,
        }
    }
}
