use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::key::{AggregationKey, Dimensions};
use crate::table::{AggregationTable, MetricVector, NUM_METRICS};

const WRITE_BUFFER_SIZE: usize = 1 << 16;

/// A row of the results: the key columns followed by the metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub key: AggregationKey,
    pub metrics: MetricVector,
}

impl OutputRow {
    pub fn fields(&self) -> Vec<String> {
        let mut fields = self.key.fields();
        fields.extend(self.metrics.values().iter().map(u128::to_string));
        fields
    }
}

/// Header of the results: `timestamp[,user][,app],metric_1..metric_9`.
pub fn header(dimensions: Dimensions) -> Vec<String> {
    dimensions
        .columns()
        .into_iter()
        .map(String::from)
        .chain((1..=NUM_METRICS).map(|i| format!("metric_{i}")))
        .collect()
}

/// Rows of the final table, sorted by key.
pub fn sorted_rows(table: AggregationTable) -> Vec<OutputRow> {
    table
        .into_sorted()
        .into_iter()
        .map(|(key, metrics)| OutputRow { key, metrics })
        .collect()
}

/// Destination of the rows of the results.
pub trait RowWriter {
    fn write_header(&mut self, header: &[String]) -> Result<()>;
    fn write_row(&mut self, row: &OutputRow) -> Result<()>;
    fn finalize(&mut self) -> Result<()>;
}

/// Send the header and the sorted rows of `table` to `writer`, returning the number of rows.
pub fn emit<W: RowWriter>(
    table: AggregationTable,
    dimensions: Dimensions,
    writer: &mut W,
) -> Result<usize> {
    writer.write_header(&header(dimensions))?;
    let rows = sorted_rows(table);
    for row in &rows {
        writer.write_row(row)?;
    }
    writer.finalize()?;
    Ok(rows.len())
}

/// Writes the rows as CSV.
pub struct CsvRowWriter<W: Write> {
    writer: csv::Writer<W>,
    /// Where the rows end up, for the error messages.
    destination: PathBuf,
}

impl<W: Write> CsvRowWriter<W> {
    pub fn new(inner: W, destination: impl Into<PathBuf>) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(inner),
            destination: destination.into(),
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.writer.into_inner().ok()
    }

    fn wrap(&self, source: csv::Error) -> Error {
        Error::Output {
            path: self.destination.clone(),
            source,
        }
    }
}

impl CsvRowWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::new(
            BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            path,
        ))
    }
}

impl<W: Write> RowWriter for CsvRowWriter<W> {
    fn write_header(&mut self, header: &[String]) -> Result<()> {
        self.writer
            .write_record(header)
            .map_err(|e| self.wrap(e))
    }

    fn write_row(&mut self, row: &OutputRow) -> Result<()> {
        self.writer
            .write_record(row.fields())
            .map_err(|e| self.wrap(e))
    }

    fn finalize(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| self.wrap(csv::Error::from(e)))
    }
}

/// Pick a file name in `dir` that does not overwrite previous results.
///
/// If `name` is free it is used as is, otherwise a numeric suffix one greater than the highest
/// one already present is added: `result.csv`, `result_1.csv`, `result_2.csv`, ... A name without
/// extension gets `.csv`.
pub fn next_output_path(dir: &Path, name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let name = Path::new(name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "result".to_string());
    let ext = name
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());

    let base = dir.join(format!("{stem}.{ext}"));
    if !base.exists() {
        return Ok(base);
    }

    let prefix = format!("{stem}_");
    let suffix = format!(".{ext}");
    let mut max = 0u64;
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let n = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(n) = n {
            max = max.max(n);
        }
    }
    Ok(dir.join(format!("{stem}_{}.{ext}", max + 1)))
}

/// Write the table as CSV in `dir`, under a name derived from `name` that does not collide with
/// previous results. Nothing is written for an empty table.
pub fn write_results(
    dir: &Path,
    name: &str,
    dimensions: Dimensions,
    table: AggregationTable,
) -> Result<Option<(PathBuf, usize)>> {
    if table.is_empty() {
        return Ok(None);
    }
    let path = next_output_path(dir, name)?;
    let mut writer = CsvRowWriter::create(&path)?;
    let rows = emit(table, dimensions, &mut writer)?;
    info!("results saved to {}", path.display());
    Ok(Some((path, rows)))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::time::parse_timestamp;

    fn table() -> AggregationTable {
        let p1 = parse_timestamp("2025-01-01 00:30:00").unwrap();
        let p0 = parse_timestamp("2025-01-01 00:00:00").unwrap();
        let d = Dimensions::USER_APP;
        [
            (d.key(p1, "u1", "a1"), MetricVector::splat(1)),
            (d.key(p0, "u2", "a1"), MetricVector::splat(2)),
            (d.key(p0, "u1", "a2"), MetricVector::from([1, 2, 3, 4, 5, 6, 7, 8, 9])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn header_columns() {
        assert_eq!(
            header(Dimensions::USER).join(","),
            "timestamp,user,metric_1,metric_2,metric_3,metric_4,metric_5,metric_6,metric_7,metric_8,metric_9"
        );
        assert_eq!(header(Dimensions::USER_APP)[..3], ["timestamp", "user", "app"]);
    }

    #[test]
    fn emits_sorted_csv() {
        let mut writer = CsvRowWriter::new(Vec::new(), "memory");
        let rows = emit(table(), Dimensions::USER_APP, &mut writer).unwrap();
        assert_eq!(rows, 3);
        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("timestamp,user,app,metric_1"));
        assert_eq!(lines[1], "2025-01-01 00:00:00,u1,a2,1,2,3,4,5,6,7,8,9");
        assert_eq!(lines[2], "2025-01-01 00:00:00,u2,a1,2,2,2,2,2,2,2,2,2");
        assert_eq!(lines[3], "2025-01-01 00:30:00,u1,a1,1,1,1,1,1,1,1,1,1");
    }

    #[test]
    fn output_names_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let first = next_output_path(dir.path(), "result.csv").unwrap();
        assert_eq!(first, dir.path().join("result.csv"));
        std::fs::write(&first, "").unwrap();

        let second = next_output_path(dir.path(), "result.csv").unwrap();
        assert_eq!(second, dir.path().join("result_1.csv"));
        std::fs::write(dir.path().join("result_7.csv"), "").unwrap();
        assert_eq!(
            next_output_path(dir.path(), "result.csv").unwrap(),
            dir.path().join("result_8.csv")
        );
        assert_eq!(
            next_output_path(dir.path(), "result").unwrap(),
            dir.path().join("result_8.csv")
        );
    }

    #[test]
    fn empty_table_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let written =
            write_results(dir.path(), "result.csv", Dimensions::USER, AggregationTable::new())
                .unwrap();
        assert!(written.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn write_results_to_file() {
        let dir = TempDir::new().unwrap();
        let (path, rows) = write_results(dir.path(), "out.csv", Dimensions::USER_APP, table())
            .unwrap()
            .unwrap();
        assert_eq!(rows, 3);
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 4);
    }
}
