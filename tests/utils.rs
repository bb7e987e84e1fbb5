#![allow(dead_code)] // not all tests use all the members

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use itertools::Itertools;
use log::*;
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use rollup::time::format_timestamp;
use rollup::{AggregateRequest, AggregationTable, EngineConfig, MetricVector, SplitStrategy};

pub const USERS: &[&str] = &["user1", "user2", "user3", "user4", "user5", "user6", "user7"];
pub const APPS: &[&str] = &["facebook", "twitter", "youtube", "instagram", "tiktok"];

/// A record of a generated log file.
#[derive(Debug, Clone)]
pub struct TestRecord {
    pub timestamp: NaiveDateTime,
    pub user: String,
    pub app: String,
    pub metrics: [u64; 9],
}

impl TestRecord {
    pub fn new(timestamp: &str, user: &str, app: &str, metrics: [u64; 9]) -> Self {
        Self {
            timestamp: rollup::time::parse_timestamp(timestamp).unwrap(),
            user: user.to_string(),
            app: app.to_string(),
            metrics,
        }
    }

    pub fn line(&self) -> String {
        format!(
            "{},{},{},{}",
            format_timestamp(&self.timestamp),
            self.user,
            self.app,
            self.metrics.iter().join(",")
        )
    }
}

/// Generate `n` random records of a day, with a fixed seed.
pub fn random_day(seed: u64, day: NaiveDate, n: usize) -> Vec<TestRecord> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let time = NaiveTime::from_hms_opt(
                rng.random_range(0..24),
                rng.random_range(0..60),
                rng.random_range(0..60),
            )
            .unwrap();
            let mut metrics = [0; 9];
            for m in metrics.iter_mut() {
                *m = rng.random_range(1..=1000);
            }
            TestRecord {
                timestamp: day.and_time(time),
                user: USERS.choose(&mut rng).unwrap().to_string(),
                app: APPS.choose(&mut rng).unwrap().to_string(),
                metrics,
            }
        })
        .collect()
}

/// Lines that must be silently skipped by the parser.
pub fn noise_lines() -> Vec<String> {
    vec![
        "".to_string(),
        "just,three,fields".to_string(),
        "2025-13-45 99:99:99,user1,facebook,1,1,1,1,1,1,1,1,1".to_string(),
        "timestamp,user,app,m1,m2,m3,m4,m5,m6,m7,m8,m9".to_string(),
    ]
}

/// Write the lines of the file of `day` in `dir`, named like the engine expects.
pub fn write_day<I, S>(dir: &Path, day: NaiveDate, lines: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let config = EngineConfig::default().with_logs_dir(dir);
    let file = File::create(config.day_file(day)).unwrap();
    let mut writer = BufWriter::new(file);
    for line in lines {
        writeln!(writer, "{}", line.as_ref()).unwrap();
    }
    writer.flush().unwrap();
}

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Aggregate the records sequentially, without going through the files.
pub fn reference(records: &[TestRecord], request: &AggregateRequest) -> AggregationTable {
    records
        .iter()
        .filter(|r| request.window.contains(&r.timestamp))
        .filter(|r| in_filter(&request.users, &r.user))
        .filter(|r| in_filter(&request.apps, &r.app))
        .map(|r| {
            let period = request.granularity.period_start(r.timestamp);
            (
                request.dimensions.key(period, &r.user, &r.app),
                MetricVector::from(r.metrics),
            )
        })
        .collect()
}

/// No set and an empty set both keep everything.
fn in_filter(set: &Option<HashSet<String>>, value: &str) -> bool {
    set.as_ref().is_none_or(|set| set.is_empty() || set.contains(value))
}

/// Helper functions for running the integration tests.
pub struct TestHelper;

impl TestHelper {
    pub fn setup() {
        let _ = env_logger::Builder::new()
            .filter(None, log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }

    /// Run the test body with a timeout.
    pub fn with_timeout<F>(body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let timeout =
            Self::env_timeout("ROLLUP_TEST_TIMEOUT").unwrap_or(Duration::from_secs(30));
        let (sender, receiver) = std::sync::mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("Test".into())
            .spawn(move || {
                body();
                sender.send(()).unwrap();
            })
            .unwrap();
        match receiver.recv_timeout(timeout) {
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                panic!(
                    "Test thread didn't complete before the timeout of {:?}",
                    timeout
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                panic!("Test thread has panicked!");
            }
        }
        worker.join().expect("Test thread has panicked!");
    }

    /// Configurations that split every file among the workers, for all the worker counts and
    /// both split strategies.
    pub fn split_configs(logs_dir: &Path) -> Vec<EngineConfig> {
        Self::setup();
        let workers = Self::env_worker_counts("ROLLUP_TEST_WORKERS")
            .filter(|counts| !counts.is_empty())
            .unwrap_or_else(|| vec![1, 2, 3, 4, 7]);
        workers
            .into_iter()
            .cartesian_product([SplitStrategy::Lines, SplitStrategy::Bytes])
            .map(|(workers, split)| {
                let mut config = EngineConfig::local(workers).with_logs_dir(logs_dir);
                config.split = split;
                config.chunk_threshold_lines = 0;
                config.chunk_threshold_bytes = 0;
                debug!("test config: {config:?}");
                config
            })
            .collect()
    }

    /// Worker counts listed in `var_name`, like `1,2,8`. Unset or unparseable means `None`.
    fn env_worker_counts(var_name: &str) -> Option<Vec<usize>> {
        std::env::var(var_name)
            .ok()?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(usize::from_str)
            .collect::<Result<Vec<_>, _>>()
            .ok()
    }

    fn env_timeout(var_name: &str) -> Option<Duration> {
        let secs = std::env::var(var_name).ok()?;
        u64::from_str(secs.trim()).ok().map(Duration::from_secs)
    }
}
