mod file_config;

pub use file_config::{FileConfig, RetryConfig};

use anyhow::{bail, Result};

/// Resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of refreshes executed concurrently.
    pub workers: usize,
    /// Hard wall-clock limit for a single refresh.
    pub refresh_timeout_secs: u64,
    /// Age after which the sweeper considers a collection stale.
    pub staleness_threshold_hours: u64,
    pub sweep_interval_secs: u64,
    /// Top-level library folders whose subfolders get combined tags.
    pub special_folders: Vec<String>,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_secs: 30,
            max_backoff_secs: 3600,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            refresh_timeout_secs: 60,
            staleness_threshold_hours: 24,
            sweep_interval_secs: 3600,
            special_folders: vec!["Xmas".to_string(), "Seasonal".to_string()],
            retry: RetrySettings::default(),
        }
    }
}

impl EngineConfig {
    /// Resolve configuration from an optional TOML file. File values
    /// override built-in defaults where present.
    pub fn resolve(file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();
        let defaults = EngineConfig::default();
        let retry_file = file.retry.unwrap_or_default();

        let config = EngineConfig {
            workers: file.workers.unwrap_or(defaults.workers),
            refresh_timeout_secs: file
                .refresh_timeout_secs
                .unwrap_or(defaults.refresh_timeout_secs),
            staleness_threshold_hours: file
                .staleness_threshold_hours
                .unwrap_or(defaults.staleness_threshold_hours),
            sweep_interval_secs: file
                .sweep_interval_secs
                .unwrap_or(defaults.sweep_interval_secs),
            special_folders: file.special_folders.unwrap_or(defaults.special_folders),
            retry: RetrySettings {
                max_retries: retry_file
                    .max_retries
                    .unwrap_or(defaults.retry.max_retries),
                initial_backoff_secs: retry_file
                    .initial_backoff_secs
                    .unwrap_or(defaults.retry.initial_backoff_secs),
                max_backoff_secs: retry_file
                    .max_backoff_secs
                    .unwrap_or(defaults.retry.max_backoff_secs),
                backoff_multiplier: retry_file
                    .backoff_multiplier
                    .unwrap_or(defaults.retry.backoff_multiplier),
            },
        };

        if config.workers == 0 {
            bail!("workers must be at least 1");
        }
        if config.refresh_timeout_secs == 0 {
            bail!("refresh_timeout_secs must be positive");
        }
        if config.retry.backoff_multiplier < 1.0 {
            bail!(
                "backoff_multiplier must be >= 1.0, got {}",
                config.retry.backoff_multiplier
            );
        }

        Ok(config)
    }
}
