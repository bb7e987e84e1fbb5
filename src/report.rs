use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::engine::AggregateOutcome;

/// Counters and timings of a run, printed at the end of the binary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub workers: usize,
    pub files_processed: usize,
    pub partitions: usize,
    pub records_read: u64,
    pub rows_matched: u64,
    pub rows_rejected: u64,
    pub buckets: usize,
    pub output: Option<PathBuf>,
    pub planning_secs: f64,
    pub scanning_secs: f64,
    pub merging_secs: f64,
    pub writing_secs: f64,
}

impl RunSummary {
    pub fn new(outcome: &AggregateOutcome, workers: usize) -> Self {
        Self {
            workers,
            files_processed: outcome.files_processed,
            partitions: outcome.partitions,
            records_read: outcome.records_read,
            rows_matched: outcome.rows_matched,
            rows_rejected: outcome.rows_rejected,
            buckets: outcome.table.len(),
            output: None,
            planning_secs: outcome.timings.planning.as_secs_f64(),
            scanning_secs: outcome.timings.scanning.as_secs_f64(),
            merging_secs: outcome.timings.merging.as_secs_f64(),
            writing_secs: 0.0,
        }
    }

    pub fn with_output(mut self, output: Option<PathBuf>, writing: Duration) -> Self {
        self.output = output;
        self.writing_secs = writing.as_secs_f64();
        self
    }

    pub fn total_secs(&self) -> f64 {
        self.planning_secs + self.scanning_secs + self.merging_secs + self.writing_secs
    }

    /// Records read per second of planning and scanning.
    pub fn read_throughput(&self) -> f64 {
        let secs = self.planning_secs + self.scanning_secs;
        if secs > 0.0 {
            self.records_read as f64 / secs
        } else {
            0.0
        }
    }
}

/// Human readable duration: milliseconds below one second, minutes above one minute.
pub fn format_secs(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.2}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{secs:.3}s")
    } else {
        format!("{}m {:.1}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = "-".repeat(60);
        writeln!(f, "{rule}")?;
        writeln!(
            f,
            "{} files, {} partitions, {} workers",
            self.files_processed, self.partitions, self.workers
        )?;
        writeln!(
            f,
            "{} records read, {} matched, {} rejected, {} buckets",
            self.records_read, self.rows_matched, self.rows_rejected, self.buckets
        )?;
        match &self.output {
            Some(path) => writeln!(f, "results: {}", path.display())?,
            None => writeln!(f, "no data found matching the criteria")?,
        }
        writeln!(f, "{rule}")?;
        writeln!(f, "{:<20}{:>14}", "planning", format_secs(self.planning_secs))?;
        writeln!(f, "{:<20}{:>14}", "scanning", format_secs(self.scanning_secs))?;
        writeln!(f, "{:<20}{:>14}", "merging", format_secs(self.merging_secs))?;
        writeln!(f, "{:<20}{:>14}", "writing", format_secs(self.writing_secs))?;
        writeln!(f, "{:<20}{:>14}", "total", format_secs(self.total_secs()))?;
        writeln!(f, "{:<20}{:>14.0}", "records/s", self.read_throughput())?;
        write!(f, "{rule}")
    }
}
