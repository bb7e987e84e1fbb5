use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::key::Dimensions;
use crate::planner::{ChunkPlanner, FilePartition};
use crate::record::RecordFilter;
use crate::scheduler::WorkerPool;
use crate::table::AggregationTable;
use crate::time::{Granularity, TimeWindow};
use crate::worker::{scan_partition, WorkerOutput};

/// What to aggregate: the time window, the buckets and the optional user and app filters.
#[derive(Debug, Clone)]
pub struct AggregateRequest {
    pub window: TimeWindow,
    pub granularity: Granularity,
    pub dimensions: Dimensions,
    pub users: Option<HashSet<String>>,
    pub apps: Option<HashSet<String>>,
}

impl AggregateRequest {
    pub fn new(window: TimeWindow, granularity: Granularity, dimensions: Dimensions) -> Self {
        Self {
            window,
            granularity,
            dimensions,
            users: None,
            apps: None,
        }
    }

    /// Keep only the records of these users. No users means no filter.
    pub fn users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = to_filter_set(users);
        self
    }

    /// Keep only the records of these apps. No apps means no filter.
    pub fn apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apps = to_filter_set(apps);
        self
    }

    fn filter(&self) -> RecordFilter {
        RecordFilter::new(
            self.window,
            self.granularity,
            self.users.clone(),
            self.apps.clone(),
        )
    }
}

fn to_filter_set<I, S>(values: I) -> Option<HashSet<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let set: HashSet<String> = values.into_iter().map(Into::into).collect();
    (!set.is_empty()).then_some(set)
}

/// Wall-clock time spent in each phase of an aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhaseTimings {
    pub planning: Duration,
    pub scanning: Duration,
    pub merging: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.planning + self.scanning + self.merging
    }
}

/// The final table of an aggregation and the counters of the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOutcome {
    pub table: AggregationTable,
    /// Records that passed all the filters.
    pub rows_matched: u64,
    pub rows_rejected: u64,
    pub records_read: u64,
    /// Day files that exist in the requested range.
    pub files_processed: usize,
    pub partitions: usize,
    pub timings: PhaseTimings,
}

/// Runs aggregation requests over the directory of day files described by its configuration.
///
/// ```no_run
/// # use rollup::{AggregateRequest, Dimensions, Engine, EngineConfig, Granularity, TimeWindow};
/// # use rollup::time::parse_bound;
/// let engine = Engine::new(EngineConfig::local(4).with_logs_dir("csv_logs")).unwrap();
/// let window = TimeWindow::new(
///     parse_bound("2025-01-01 00:00:00").unwrap(),
///     parse_bound("2025-02-01 00:00:00").unwrap(),
/// );
/// let request = AggregateRequest::new(window, Granularity::OneDay, Dimensions::USER)
///     .apps(["youtube", "twitter"]);
/// let outcome = engine.aggregate(&request).unwrap();
/// println!("{} rows matched", outcome.rows_matched);
/// ```
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    pool: WorkerPool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.workers)?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Aggregate the day files covering the window of the request.
    ///
    /// Days without a file contribute no records and are not counted as processed.
    pub fn aggregate(&self, request: &AggregateRequest) -> Result<AggregateOutcome> {
        let files = day_files(&self.config, &request.window)?;
        self.aggregate_files(files, request)
    }

    /// Aggregate an explicit list of existing files.
    pub fn aggregate_files(
        &self,
        files: Vec<PathBuf>,
        request: &AggregateRequest,
    ) -> Result<AggregateOutcome> {
        info!(
            "aggregating {} files in {} by {} every {} with {} workers",
            files.len(),
            request.window,
            request.dimensions,
            request.granularity,
            self.pool.num_workers()
        );
        let files_processed = files.len();

        // planning: every file is a unit of work, large ones are further split in chunks
        let start = Instant::now();
        let planner = self.planner();
        let partitions: Vec<FilePartition> = self
            .pool
            .execute("rollup-plan", files.into_iter().map(DisplayPath).collect(), |p| {
                planner.plan(&p.0)
            })?
            .into_iter()
            .flatten()
            .collect();
        let planning = start.elapsed();
        info!(
            "planned {} partitions in {:.3}s",
            partitions.len(),
            planning.as_secs_f64()
        );

        // scanning: one private table per partition
        let start = Instant::now();
        let num_partitions = partitions.len();
        let filter = request.filter();
        let dimensions = request.dimensions;
        let outputs = self
            .pool
            .execute("rollup-scan", partitions, |partition| {
                scan_partition(&partition, &filter, dimensions)
            })?;
        let scanning = start.elapsed();
        info!(
            "scanned {num_partitions} partitions in {:.3}s",
            scanning.as_secs_f64()
        );

        // merging
        let start = Instant::now();
        let mut outcome = AggregateOutcome {
            files_processed,
            partitions: num_partitions,
            ..Default::default()
        };
        let mut tables = Vec::with_capacity(outputs.len());
        for WorkerOutput {
            table,
            records_read,
            rows_accepted,
            rows_rejected,
        } in outputs
        {
            outcome.records_read += records_read;
            outcome.rows_matched += rows_accepted;
            outcome.rows_rejected += rows_rejected;
            tables.push(table);
        }
        outcome.table = AggregationTable::merge_all(tables);
        let merging = start.elapsed();
        info!(
            "merged {} buckets from {} rows in {:.3}s",
            outcome.table.len(),
            outcome.rows_matched,
            merging.as_secs_f64()
        );

        outcome.timings = PhaseTimings {
            planning,
            scanning,
            merging,
        };
        Ok(outcome)
    }

    fn planner(&self) -> ChunkPlanner {
        ChunkPlanner {
            workers: self.config.workers,
            strategy: self.config.split,
            threshold_lines: self.config.chunk_threshold_lines,
            threshold_bytes: self.config.chunk_threshold_bytes,
        }
    }
}

/// The existing log files of the days named by `window`, from the date of its start to the date
/// of its end, in date order.
///
/// Days without a file are skipped. A path that exists but is not a regular file, or that cannot
/// be inspected, is an error.
pub fn day_files(config: &EngineConfig, window: &TimeWindow) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for day in window.days() {
        let path = config.day_file(day);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => files.push(path),
            Ok(_) => {
                return Err(Error::io(
                    &path,
                    std::io::Error::new(ErrorKind::InvalidInput, "not a regular file"),
                ))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no log file for {day}, skipping");
            }
            Err(e) => return Err(Error::io(&path, e)),
        }
    }
    Ok(files)
}

/// Entry point with the parameters spelled out: aggregates the files of `config.logs_dir`.
pub fn aggregate(
    config: EngineConfig,
    window: TimeWindow,
    granularity: Granularity,
    dimensions: Dimensions,
    users: Option<HashSet<String>>,
    apps: Option<HashSet<String>>,
) -> Result<AggregateOutcome> {
    let request = AggregateRequest {
        window,
        granularity,
        dimensions,
        users,
        apps,
    };
    Engine::new(config)?.aggregate(&request)
}

struct DisplayPath(PathBuf);

impl std::fmt::Display for DisplayPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::time::parse_bound;

    #[test]
    fn day_files_skip_missing_days() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::local(1).with_logs_dir(dir.path());
        for d in ["2025-01-01", "2025-01-03", "2025-01-04", "2025-01-05"] {
            std::fs::write(dir.path().join(format!("{d}.log.csv")), "").unwrap();
        }
        // the window ends at midnight of the 4th: that file is still part of the range
        let window = TimeWindow::new(
            parse_bound("2025-01-01 12:00:00").unwrap(),
            parse_bound("2025-01-04 00:00:00").unwrap(),
        );
        let files = day_files(&config, &window).unwrap();
        assert_eq!(
            files,
            [
                dir.path().join("2025-01-01.log.csv"),
                dir.path().join("2025-01-03.log.csv"),
                dir.path().join("2025-01-04.log.csv"),
            ]
        );
    }

    #[test]
    fn no_files_no_rows() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(EngineConfig::local(2).with_logs_dir(dir.path())).unwrap();
        let window = TimeWindow::new(
            parse_bound("2025-01-01 00:00:00").unwrap(),
            parse_bound("2025-01-02 00:00:00").unwrap(),
        );
        let request = AggregateRequest::new(window, Granularity::OneDay, Dimensions::USER);
        let outcome = engine.aggregate(&request).unwrap();
        assert_eq!(outcome.files_processed, 0);
        assert_eq!(outcome.partitions, 0);
        assert!(outcome.table.is_empty());
    }
}
