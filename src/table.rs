use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::ops::{Add, AddAssign};

use crate::key::AggregationKey;

/// Number of metric columns of every record.
pub const NUM_METRICS: usize = 9;

pub(crate) type GroupHasherBuilder = BuildHasherDefault<wyhash::WyHash>;

/// A metric of a single record.
pub type Metric = u64;

/// Sum of the metrics of a bucket: wide enough that adding `u64` values never overflows in
/// practice (it would take 2^64 records with the largest metric).
pub type MetricSum = u128;

/// The metrics of a record, or the running sum of the metrics of a bucket.
///
/// The all-zero vector is the identity of the sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MetricVector(pub [MetricSum; NUM_METRICS]);

impl MetricVector {
    pub const ZERO: MetricVector = MetricVector([0; NUM_METRICS]);

    pub fn splat(value: Metric) -> Self {
        MetricVector([value.into(); NUM_METRICS])
    }

    pub fn values(&self) -> &[MetricSum; NUM_METRICS] {
        &self.0
    }
}

impl AddAssign<&MetricVector> for MetricVector {
    #[inline]
    fn add_assign(&mut self, rhs: &MetricVector) {
        for (acc, v) in self.0.iter_mut().zip(rhs.0.iter()) {
            *acc += v;
        }
    }
}

impl AddAssign for MetricVector {
    #[inline]
    fn add_assign(&mut self, rhs: MetricVector) {
        *self += &rhs;
    }
}

impl Add for MetricVector {
    type Output = MetricVector;

    fn add(mut self, rhs: MetricVector) -> MetricVector {
        self += &rhs;
        self
    }
}

impl From<[Metric; NUM_METRICS]> for MetricVector {
    fn from(values: [Metric; NUM_METRICS]) -> Self {
        MetricVector(values.map(MetricSum::from))
    }
}

/// Per-bucket sums of the metrics.
///
/// Every worker fills its own table; tables are combined with [`AggregationTable::merge`], which
/// is commutative and associative, so the final table does not depend on how the input was
/// partitioned nor on the order in which the workers completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationTable {
    buckets: HashMap<AggregationKey, MetricVector, GroupHasherBuilder>,
}

impl AggregationTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Fold `metrics` into the bucket of `key`, starting from zero if the key is new.
    #[inline]
    pub fn accumulate(&mut self, key: AggregationKey, metrics: &MetricVector) {
        match self.buckets.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(*metrics);
            }
            Entry::Occupied(mut entry) => {
                *entry.get_mut() += metrics;
            }
        }
    }

    /// Add all the buckets of `other` into `self`.
    pub fn merge(&mut self, other: AggregationTable) {
        if self.buckets.len() < other.buckets.len() {
            let smaller = std::mem::replace(self, other);
            return self.merge(smaller);
        }
        for (key, metrics) in other.buckets {
            self.accumulate(key, &metrics);
        }
    }

    /// Combine any number of tables into a single one. No tables produce an empty table.
    pub fn merge_all<I>(tables: I) -> AggregationTable
    where
        I: IntoIterator<Item = AggregationTable>,
    {
        tables
            .into_iter()
            .reduce(|mut acc, table| {
                acc.merge(table);
                acc
            })
            .unwrap_or_default()
    }

    pub fn get(&self, key: &AggregationKey) -> Option<&MetricVector> {
        self.buckets.get(key)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AggregationKey, &MetricVector)> {
        self.buckets.iter()
    }

    /// Consume the table returning the buckets sorted by key.
    pub fn into_sorted(self) -> Vec<(AggregationKey, MetricVector)> {
        let mut buckets: Vec<_> = self.buckets.into_iter().collect();
        glidesort::sort_by(&mut buckets, |a, b| a.0.cmp(&b.0));
        buckets
    }
}

impl FromIterator<(AggregationKey, MetricVector)> for AggregationTable {
    fn from_iter<T: IntoIterator<Item = (AggregationKey, MetricVector)>>(iter: T) -> Self {
        let mut table = AggregationTable::new();
        for (key, metrics) in iter {
            table.accumulate(key, &metrics);
        }
        table
    }
}
