use std::collections::HashSet;

use chrono::NaiveDateTime;
use csv::StringRecord;

use crate::table::{Metric, MetricVector, NUM_METRICS};
use crate::time::{parse_timestamp, Granularity, TimeWindow};

/// Minimum number of fields of a valid line: timestamp, user, app and the metrics.
pub const MIN_FIELDS: usize = 3 + NUM_METRICS;

/// Index of the first metric field.
const FIRST_METRIC: usize = 3;

/// A log record that passed all the filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    pub timestamp: NaiveDateTime,
    pub user: &'a str,
    pub app: &'a str,
    pub metrics: MetricVector,
    /// Start of the bucket the record is attributed to.
    pub period: NaiveDateTime,
}

/// A metric field that is not a non-negative integer.
///
/// Unlike the other malformations this cannot be skipped: the rest of the file does not follow
/// the expected schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadMetric {
    /// 1-based index of the metric column.
    pub column: usize,
    pub value: String,
}

/// Predicates applied to every line, built once per aggregation request and shared read-only by
/// all the workers.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    users: Option<HashSet<String>>,
    apps: Option<HashSet<String>>,
    window: TimeWindow,
    granularity: Granularity,
}

impl RecordFilter {
    /// An empty user or app set is the same as no set: it does not filter anything.
    pub fn new(
        window: TimeWindow,
        granularity: Granularity,
        users: Option<HashSet<String>>,
        apps: Option<HashSet<String>>,
    ) -> Self {
        Self {
            users: users.filter(|users| !users.is_empty()),
            apps: apps.filter(|apps| !apps.is_empty()),
            window,
            granularity,
        }
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Parse and filter a line already split in fields.
    ///
    /// Returns `Ok(None)` when the line is rejected: too few fields, a user or an app not in the
    /// filter sets, an unparseable timestamp or a timestamp outside the window. The metrics are
    /// parsed only for the records that pass all the filters.
    pub fn accept<'a>(
        &self,
        fields: &'a StringRecord,
    ) -> std::result::Result<Option<Record<'a>>, BadMetric> {
        if fields.len() < MIN_FIELDS {
            return Ok(None);
        }
        let user = &fields[1];
        let app = &fields[2];
        if let Some(users) = &self.users {
            if !users.contains(user) {
                return Ok(None);
            }
        }
        if let Some(apps) = &self.apps {
            if !apps.contains(app) {
                return Ok(None);
            }
        }
        let Some(timestamp) = parse_timestamp(&fields[0]) else {
            return Ok(None);
        };
        if !self.window.contains(&timestamp) {
            return Ok(None);
        }

        let mut metrics = MetricVector::ZERO;
        for (i, slot) in metrics.0.iter_mut().enumerate() {
            let raw = &fields[FIRST_METRIC + i];
            let value: Metric = raw.trim().parse().map_err(|_| BadMetric {
                column: i + 1,
                value: raw.to_string(),
            })?;
            *slot = value.into();
        }

        Ok(Some(Record {
            timestamp,
            user,
            app,
            metrics,
            period: self.granularity.period_start(timestamp),
        }))
    }
}
