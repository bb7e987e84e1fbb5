use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::planner::SplitStrategy;

/// Environment variable with the path of the configuration file, used when no path is given
/// explicitly.
pub const CONFIG_ENV_VAR: &str = "ROLLUP_CONFIG";

/// Configuration of the aggregation engine.
///
/// All the fields are optional in the TOML file, the missing ones take the default value:
///
/// ```toml
/// logs_dir = "/data/csv_logs"
/// workers = 8
/// split = "bytes"
/// chunk_threshold_bytes = 16777216
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory with one log file per day.
    pub logs_dir: PathBuf,
    /// The file of a day is named `YYYY-MM-DD<file_suffix>`.
    pub file_suffix: String,
    /// Number of worker threads.
    pub workers: usize,
    pub split: SplitStrategy,
    /// Files with fewer lines are not split among workers.
    pub chunk_threshold_lines: u64,
    /// Files with fewer bytes are not split among workers, used by `split = "bytes"`.
    pub chunk_threshold_bytes: u64,
    /// Directory where the results are written.
    pub results_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("csv_logs"),
            file_suffix: ".log.csv".to_string(),
            workers: 4,
            split: SplitStrategy::Lines,
            chunk_threshold_lines: 100_000,
            chunk_threshold_bytes: 8 << 20,
            results_dir: PathBuf::from("results"),
        }
    }
}

impl EngineConfig {
    /// Default configuration with the given number of workers.
    pub fn local(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    pub fn with_logs_dir(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = logs_dir.into();
        self
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml(&content, path)
    }

    /// Load the file given explicitly, or the one in `ROLLUP_CONFIG`, or use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match std::env::var_os(CONFIG_ENV_VAR) {
                Some(path) => {
                    debug!("reading configuration from ${CONFIG_ENV_VAR}");
                    Self::from_file(PathBuf::from(path))
                }
                None => Ok(Self::default()),
            },
        }
    }

    /// Path of the log file of a day.
    pub fn day_file(&self, day: chrono::NaiveDate) -> PathBuf {
        self.logs_dir
            .join(format!("{}{}", day.format("%Y-%m-%d"), self.file_suffix))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidWorkerCount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml(
            "logs_dir = \"/data\"\nworkers = 8\nsplit = \"bytes\"",
            Path::new("rollup.toml"),
        )
        .unwrap();
        assert_eq!(config.logs_dir, PathBuf::from("/data"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.split, SplitStrategy::Bytes);
        assert_eq!(config.chunk_threshold_lines, 100_000);
        assert_eq!(config.file_suffix, ".log.csv");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = EngineConfig::from_toml("threads = 3", Path::new("rollup.toml")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn day_file_name() {
        let config = EngineConfig::local(2).with_logs_dir("/logs");
        let day = chrono::NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(config.day_file(day), PathBuf::from("/logs/2025-03-09.log.csv"));
    }

    #[test]
    fn zero_workers_is_invalid() {
        assert!(matches!(
            EngineConfig::local(0).validate(),
            Err(Error::InvalidWorkerCount)
        ));
    }
}
