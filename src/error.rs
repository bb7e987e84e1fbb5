use std::fmt::Display;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Position of a record inside a log file.
///
/// The line number is known only when the partition was planned from a line index; byte-range
/// partitions are aligned at scan time and only know the byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: PathBuf,
    /// 1-based line number.
    pub line: Option<u64>,
    /// Byte offset of the start of the record.
    pub byte: u64,
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path.display(), line),
            None => write!(f, "{} (byte {})", self.path.display(), self.byte),
        }
    }
}

/// Fatal errors of an aggregation request.
///
/// Malformed lines, unparseable timestamps and filtered-out records are not errors: they are
/// dropped silently and only counted.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{location}: metric column {column} is not an integer: {value:?}")]
    MalformedMetric {
        location: Location,
        column: usize,
        value: String,
    },
    #[error("cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{location}: {source}")]
    Csv {
        location: Location,
        #[source]
        source: csv::Error,
    },
    #[error("invalid granularity {0:?}, expected one of 30m, 1day")]
    InvalidGranularity(String),
    #[error("invalid dimension {0:?}, expected user or app")]
    InvalidDimension(String),
    #[error("at least one dimension between user and app is required")]
    EmptyDimensions,
    #[error("the number of workers must be positive")]
    InvalidWorkerCount,
    #[error("invalid timestamp {0:?}, expected YYYY-MM-DD HH:MM:SS")]
    InvalidTimestamp(String),
    #[error("invalid configuration file {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("worker {worker} crashed while processing {partition}")]
    WorkerCrashed { worker: usize, partition: String },
    #[error("cannot write results to {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
