use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};

use csv::{Reader, ReaderBuilder, Terminator};

use crate::error::{Error, Result};
use crate::planner::{Extent, FilePartition};

const READ_BUFFER_SIZE: usize = 1 << 16;

/// Wrapper that limits the bytes that can be read from a type that implements `io::Read`.
pub(crate) struct LimitedReader<R: Read> {
    inner: R,
    /// Bytes remaining to be read.
    remaining: u64,
}

impl<R: Read> LimitedReader<R> {
    fn new(inner: R, remaining: u64) -> Self {
        Self { inner, remaining }
    }

    fn unlimited(inner: R) -> Self {
        Self::new(inner, u64::MAX)
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining.try_into().unwrap_or(usize::MAX));
        let read_bytes = self.inner.read(&mut buf[..max])?;
        self.remaining -= read_bytes as u64;
        Ok(read_bytes)
    }
}

/// A CSV reader positioned on the first line of a partition, which stops after its last line.
pub(crate) struct PartitionReader {
    pub reader: Reader<LimitedReader<BufReader<File>>>,
    /// Byte offset in the file of the first line read.
    pub start_byte: u64,
    /// Line number in the file of the first line read, if known.
    pub first_line: Option<u64>,
}

impl PartitionReader {
    pub fn open(partition: &FilePartition) -> Result<Self> {
        let path = &partition.path;
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut buf_reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let (start, limit) = match partition.extent {
            Extent::Whole => (0, None),
            Extent::Lines {
                start_byte,
                end_byte,
                ..
            } => (start_byte, Some(end_byte.saturating_sub(start_byte))),
            Extent::Bytes {
                start,
                end,
                first,
                last,
            } => {
                let (start, end) = align_byte_range(&mut buf_reader, start, end, first, last)
                    .map_err(|e| Error::io(path, e))?;
                (start, Some(end.saturating_sub(start)))
            }
        };

        // Rewind BufReader to the start of the partition
        buf_reader
            .seek(SeekFrom::Start(start))
            .map_err(|e| Error::io(path, e))?;

        let limited_reader = match limit {
            Some(limit) => LimitedReader::new(buf_reader, limit),
            None => LimitedReader::unlimited(buf_reader),
        };

        // one record per line: fields are never quoted, and only `\n` ends a line so that the
        // line numbers agree with the planner's index (a `\r` before it is trimmed with the
        // last metric)
        let reader = ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .terminator(Terminator::Any(b'\n'))
            .from_reader(limited_reader);

        Ok(Self {
            reader,
            start_byte: start,
            first_line: partition.first_line(),
        })
    }
}

/// Move the nominal boundaries of a byte range to whole lines.
///
/// The line containing a nominal boundary byte belongs to the earlier partition, so two adjacent
/// ranges always agree on where one ends and the next begins.
fn align_byte_range<R: BufRead + Seek>(
    reader: &mut R,
    mut start: u64,
    mut end: u64,
    first: bool,
    last: bool,
) -> io::Result<(u64, u64)> {
    let mut discard = Vec::new();
    if !first {
        reader.seek(SeekFrom::Start(start))?;
        start += reader.read_until(b'\n', &mut discard)? as u64;
    }
    if !last {
        discard.clear();
        reader.seek(SeekFrom::Start(end))?;
        end += reader.read_until(b'\n', &mut discard)? as u64;
    } else {
        end = reader.seek(SeekFrom::End(0))?;
    }
    tracing::trace!("aligned byte range to {start}..{end}");
    Ok((start, end.max(start)))
}
