use csv::StringRecord;

use crate::error::{Error, Location, Result};
use crate::key::Dimensions;
use crate::planner::FilePartition;
use crate::record::RecordFilter;
use crate::source::PartitionReader;
use crate::table::AggregationTable;

/// What a worker produced after reading its whole partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerOutput {
    /// The private table of the worker.
    pub table: AggregationTable,
    /// Non-empty lines read from the partition.
    pub records_read: u64,
    /// Records that passed all the filters and were aggregated.
    pub rows_accepted: u64,
    /// Lines dropped because malformed, with an unparseable timestamp or filtered out.
    pub rows_rejected: u64,
}

/// Read a partition, aggregating the accepted records into a private table.
///
/// The table is owned by the caller's worker and is never shared until it is handed to the
/// merge. A malformed metric aborts the partition with an error that points to the line.
pub fn scan_partition(
    partition: &FilePartition,
    filter: &RecordFilter,
    dimensions: Dimensions,
) -> Result<WorkerOutput> {
    let PartitionReader {
        mut reader,
        start_byte,
        first_line,
    } = PartitionReader::open(partition)?;

    let location = |pos: &csv::Position| Location {
        path: partition.path.clone(),
        line: first_line.map(|first| first + pos.line()),
        byte: start_byte + pos.byte(),
    };

    let mut output = WorkerOutput::default();
    let mut fields = StringRecord::new();
    loop {
        match reader.read_record(&mut fields) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => {
                output.records_read += 1;
                output.rows_rejected += 1;
                continue;
            }
            Err(e) => {
                return Err(Error::Csv {
                    location: location(reader.position()),
                    source: e,
                });
            }
        }
        output.records_read += 1;

        let record = match filter.accept(&fields) {
            Ok(Some(record)) => record,
            Ok(None) => {
                output.rows_rejected += 1;
                continue;
            }
            Err(bad) => {
                return Err(Error::MalformedMetric {
                    location: location(fields.position().unwrap_or(reader.position())),
                    column: bad.column,
                    value: bad.value,
                })
            }
        };

        let key = dimensions.key(record.period, record.user, record.app);
        output.table.accumulate(key, &record.metrics);
        output.rows_accepted += 1;
    }

    tracing::debug!(
        "scanned {partition}: {} read, {} accepted, {} buckets",
        output.records_read,
        output.rows_accepted,
        output.table.len()
    );
    Ok(output)
}
