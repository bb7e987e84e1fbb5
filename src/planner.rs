use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the planner splits a file that is large enough to be read by multiple workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStrategy {
    /// Index the line starts of the file once, then assign each worker an exact range of lines.
    #[default]
    Lines,
    /// Split the file size in equal byte ranges, aligned to whole lines while reading.
    Bytes,
}

impl std::str::FromStr for SplitStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "lines" => Ok(SplitStrategy::Lines),
            "bytes" => Ok(SplitStrategy::Bytes),
            other => Err(format!("unknown split strategy {other:?}")),
        }
    }
}

/// Byte offsets of the start of every line of a file, collected with a single pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    offsets: Vec<u64>,
    file_size: u64,
}

impl LineIndex {
    pub fn build(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        Self::from_reader(BufReader::with_capacity(1 << 16, file)).map_err(|e| Error::io(path, e))
    }

    pub fn from_reader<R: BufRead>(mut reader: R) -> std::io::Result<Self> {
        let mut offsets = Vec::new();
        let mut pos = 0u64;
        let mut at_line_start = true;
        loop {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                break;
            }
            for (i, &b) in buf.iter().enumerate() {
                if at_line_start {
                    offsets.push(pos + i as u64);
                    at_line_start = false;
                }
                if b == b'\n' {
                    at_line_start = true;
                }
            }
            let n = buf.len();
            pos += n as u64;
            reader.consume(n);
        }
        Ok(Self {
            offsets,
            file_size: pos,
        })
    }

    /// Number of lines, counting a last line without terminator.
    pub fn num_lines(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Byte offset of the start of `line`, or the file size past the last line.
    pub fn offset(&self, line: u64) -> u64 {
        self.offsets
            .get(line as usize)
            .copied()
            .unwrap_or(self.file_size)
    }
}

/// Bytes read from the start of a file to estimate its number of lines.
const ESTIMATE_SAMPLE_SIZE: u64 = 1 << 16;

/// Estimate the number of lines of a file from the average line length of its first bytes.
pub fn estimate_lines(path: &Path, size: u64) -> Result<u64> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut sample = Vec::new();
    file.take(ESTIMATE_SAMPLE_SIZE)
        .read_to_end(&mut sample)
        .map_err(|e| Error::io(path, e))?;
    if sample.is_empty() {
        return Ok(0);
    }
    let newlines = sample.iter().filter(|&&b| b == b'\n').count() as u64;
    if sample.len() as u64 >= size {
        // the sample is the whole file
        let unterminated = u64::from(sample.last() != Some(&b'\n'));
        return Ok(newlines + unterminated);
    }
    let estimate = (newlines as u128 * size as u128 / sample.len() as u128) as u64;
    Ok(estimate.max(1))
}

/// The slice of a file assigned to a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// All the lines of the file.
    Whole,
    /// Lines `[start_line, start_line + line_count)`, spanning bytes `[start_byte, end_byte)`.
    Lines {
        start_line: u64,
        line_count: u64,
        start_byte: u64,
        end_byte: u64,
    },
    /// Nominal byte range `[start, end)`.
    ///
    /// The line containing a boundary byte belongs to the earlier partition: unless it is the
    /// first of its file, the worker skips to the first line starting after `start`; unless it is
    /// the last, it reads through the end of the line containing `end`.
    Bytes {
        start: u64,
        end: u64,
        first: bool,
        last: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePartition {
    pub path: PathBuf,
    pub extent: Extent,
    /// Position of this partition among the partitions of the same file.
    pub chunk: usize,
    pub num_chunks: usize,
}

impl FilePartition {
    pub fn whole(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extent: Extent::Whole,
            chunk: 0,
            num_chunks: 1,
        }
    }

    /// Line number of the first line of the partition, when known before reading.
    pub fn first_line(&self) -> Option<u64> {
        match self.extent {
            Extent::Whole => Some(0),
            Extent::Lines { start_line, .. } => Some(start_line),
            Extent::Bytes { .. } => None,
        }
    }
}

impl Display for FilePartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())?;
        match self.extent {
            Extent::Whole => Ok(()),
            Extent::Lines {
                start_line,
                line_count,
                ..
            } => write!(
                f,
                " [chunk {}/{}, lines {}..{}]",
                self.chunk + 1,
                self.num_chunks,
                start_line,
                start_line + line_count
            ),
            Extent::Bytes { start, end, .. } => write!(
                f,
                " [chunk {}/{}, bytes {}..{}]",
                self.chunk + 1,
                self.num_chunks,
                start,
                end
            ),
        }
    }
}

/// Decides how each file is divided among the workers.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    pub workers: usize,
    pub strategy: SplitStrategy,
    /// Files with fewer lines are read by a single worker.
    pub threshold_lines: u64,
    /// Files smaller than this are read by a single worker, with the byte strategy.
    pub threshold_bytes: u64,
}

impl ChunkPlanner {
    /// Plan the partitions of an existing file.
    pub fn plan(&self, path: &Path) -> Result<Vec<FilePartition>> {
        match self.strategy {
            SplitStrategy::Lines => {
                if self.workers <= 1 {
                    return Ok(vec![FilePartition::whole(path)]);
                }
                // every line takes at least one byte: skip indexing files that cannot reach the
                // threshold
                let size = std::fs::metadata(path)
                    .map_err(|e| Error::io(path, e))?
                    .len();
                if size < self.threshold_lines {
                    return Ok(vec![FilePartition::whole(path)]);
                }
                // indexing reads the whole file: skip it when a sample says the file is far from
                // the threshold
                let estimate = estimate_lines(path, size)?;
                if estimate.saturating_mul(2) < self.threshold_lines {
                    tracing::trace!(
                        "{}: about {estimate} lines, not indexed",
                        path.display()
                    );
                    return Ok(vec![FilePartition::whole(path)]);
                }
                let index = LineIndex::build(path)?;
                tracing::trace!(
                    "indexed {}: {} lines, {} bytes",
                    path.display(),
                    index.num_lines(),
                    index.file_size()
                );
                Ok(self.plan_lines(path, &index))
            }
            SplitStrategy::Bytes => {
                let size = std::fs::metadata(path)
                    .map_err(|e| Error::io(path, e))?
                    .len();
                Ok(self.plan_bytes(path, size))
            }
        }
    }

    /// Split the lines of an indexed file: all the partitions but the last have exactly
    /// `ceil(lines / workers)` lines, the last one has the remainder.
    pub fn plan_lines(&self, path: &Path, index: &LineIndex) -> Vec<FilePartition> {
        let total = index.num_lines();
        if self.workers <= 1 || total < self.threshold_lines || total <= 1 {
            return vec![FilePartition::whole(path)];
        }
        let chunk_size = total.div_ceil(self.workers as u64);
        let starts: Vec<u64> = (0..self.workers as u64)
            .map(|i| i * chunk_size)
            .take_while(|&start| start < total)
            .collect();
        let num_chunks = starts.len();
        starts
            .into_iter()
            .enumerate()
            .map(|(chunk, start_line)| {
                let line_count = chunk_size.min(total - start_line);
                FilePartition {
                    path: path.to_path_buf(),
                    extent: Extent::Lines {
                        start_line,
                        line_count,
                        start_byte: index.offset(start_line),
                        end_byte: index.offset(start_line + line_count),
                    },
                    chunk,
                    num_chunks,
                }
            })
            .collect()
    }

    /// Split the bytes of a file in equal nominal ranges, the last one takes the remainder.
    pub fn plan_bytes(&self, path: &Path, size: u64) -> Vec<FilePartition> {
        if self.workers <= 1 || size < self.threshold_bytes || size == 0 {
            return vec![FilePartition::whole(path)];
        }
        let num_chunks = self.workers;
        let range_size = size / num_chunks as u64;
        (0..num_chunks)
            .map(|chunk| {
                let start = range_size * chunk as u64;
                let last = chunk == num_chunks - 1;
                let end = if last { size } else { start + range_size };
                FilePartition {
                    path: path.to_path_buf(),
                    extent: Extent::Bytes {
                        start,
                        end,
                        first: chunk == 0,
                        last,
                    },
                    chunk,
                    num_chunks,
                }
            })
            .collect()
    }
}
