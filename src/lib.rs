//! Parallel aggregation of per-day activity logs.
//!
//! Each day of activity is stored in a CSV file with one record per line:
//! `timestamp,user,app,metric_1,...,metric_9`. An [`AggregateRequest`] selects a time window, the
//! bucket width, the dimensions used to group the records and optional user and app filters; the
//! [`Engine`] splits the files among a pool of workers, each one aggregating its partition into a
//! private [`AggregationTable`], and finally merges the tables into the result.
#[macro_use]
extern crate log;

pub mod config;
pub mod emit;
pub mod engine;
pub mod error;
pub mod key;
pub mod planner;
pub mod record;
pub mod report;
pub mod scheduler;
mod source;
pub mod table;
pub mod time;
pub mod worker;

pub use config::EngineConfig;
pub use engine::{aggregate, day_files, AggregateOutcome, AggregateRequest, Engine};
pub use error::{Error, Result};
pub use key::{AggregationKey, Dimensions};
pub use planner::SplitStrategy;
pub use table::{AggregationTable, Metric, MetricSum, MetricVector};
pub use time::{Granularity, TimeWindow};
