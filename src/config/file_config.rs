use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// TOML file configuration. All fields are optional; missing values fall
/// back to built-in defaults during resolution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub workers: Option<usize>,
    pub refresh_timeout_secs: Option<u64>,
    pub staleness_threshold_hours: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub special_folders: Option<Vec<String>>,
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

impl FileConfig {
    pub fn load<T: AsRef<Path>>(path: T) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_partial_config() {
        let raw = r#"
            workers = 2
            staleness_threshold_hours = 12

            [retry]
            max_retries = 5
        "#;
        let config: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.staleness_threshold_hours, Some(12));
        assert!(config.refresh_timeout_secs.is_none());
        assert_eq!(config.retry.unwrap().max_retries, Some(5));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let raw = "wrokers = 2";
        assert!(toml::from_str::<FileConfig>(raw).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "workers = 8").unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.workers, Some(8));

        assert!(FileConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
