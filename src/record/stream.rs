use std::io::{self, SeekFrom};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, BufReader};
use tracing::error;

use super::budget::MemoryBudget;
use super::core::{RECORD_SIZE, RECORD_SIZE_U64, Record};

/// 256KB read buffer: 64 records per read syscall.
const READ_BUF_SIZE: usize = 64 * RECORD_SIZE;

/// Why a [`RecordStream`] stopped yielding records.
#[derive(Debug)]
pub enum StreamEnd {
    /// Every record in the range was yielded.
    EndOfRange,
    /// The next record buffer could not be allocated. Not an error: the
    /// caller resumes from [`RecordStream::offset`] once memory is freed.
    MemoryPressure,
    /// A read failed. Already logged; the caller decides whether it is fatal.
    Failed(io::Error),
}

/// Lazy, forward-only sequence of records read from `[start, end)` of a file.
///
/// Reads are sequential and suspend the calling task. The stream never
/// restarts; to continue after [`StreamEnd::MemoryPressure`] open a new one
/// at [`RecordStream::offset`].
pub struct RecordStream<R> {
    reader: BufReader<R>,
    offset: u64,
    end_offset: u64,
    budget: Option<MemoryBudget>,
    yielded: u64,
    end: Option<StreamEnd>,
}

impl<R: AsyncRead + AsyncSeek + Unpin> RecordStream<R> {
    /// Position `reader` at `start_offset` and stream up to `end_offset`.
    /// Both offsets must be multiples of `RECORD_SIZE`.
    pub async fn open(
        mut reader: R,
        start_offset: u64,
        end_offset: u64,
        budget: Option<MemoryBudget>,
    ) -> io::Result<Self> {
        debug_assert_eq!(start_offset % RECORD_SIZE_U64, 0);
        debug_assert_eq!(end_offset % RECORD_SIZE_U64, 0);
        reader.seek(SeekFrom::Start(start_offset)).await?;
        Ok(RecordStream {
            reader: BufReader::with_capacity(READ_BUF_SIZE, reader),
            offset: start_offset,
            end_offset,
            budget,
            yielded: 0,
            end: None,
        })
    }

    /// Read the next record, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Record> {
        if self.end.is_some() {
            return None;
        }
        if self.offset >= self.end_offset {
            self.end = Some(StreamEnd::EndOfRange);
            return None;
        }

        let Some(mut record) = Record::try_allocate(self.budget.as_ref()) else {
            self.end = Some(StreamEnd::MemoryPressure);
            return None;
        };

        if let Err(e) = self.reader.read_exact(record.as_mut_bytes()).await {
            error!(offset = self.offset, error = %e, "record stream read failed");
            self.end = Some(StreamEnd::Failed(e));
            return None;
        }

        self.offset += RECORD_SIZE_U64;
        self.yielded += 1;
        Some(record)
    }

    /// Offset of the next record that would be read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of records yielded so far.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    pub fn end(&self) -> Option<&StreamEnd> {
        self.end.as_ref()
    }

    /// Take the end reason, leaving the stream ended with `EndOfRange`.
    pub fn take_end(&mut self) -> Option<StreamEnd> {
        let end = self.end.take();
        if end.is_some() {
            self.end = Some(StreamEnd::EndOfRange);
        }
        end
    }
}
