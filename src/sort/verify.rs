use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tracing::debug;

use super::error::{IoContext, Result, SortError};
use crate::common::io::{advise_sequential, open_input};
use crate::partition::{total_records, verification_range};
use crate::record::{MemoryBudget, RECORD_SIZE_U64, Record, RecordOrder, RecordStream, StreamEnd};

/// Checks that one shard's slice of a sorted file is in order, including the
/// record just before and just after the slice.
pub struct VerifyWorker {
    shard: usize,
    shard_count: usize,
    path: PathBuf,
    order: RecordOrder,
    budget: MemoryBudget,
    file: Option<File>,
}

impl VerifyWorker {
    pub fn new(
        shard: usize,
        shard_count: usize,
        path: &Path,
        order: RecordOrder,
        budget: MemoryBudget,
    ) -> Self {
        VerifyWorker {
            shard,
            shard_count,
            path: path.to_path_buf(),
            order,
            budget,
            file: None,
        }
    }

    /// Returns the number of records checked; fails with
    /// [`SortError::Verification`] on the first out-of-order pair.
    pub async fn run(&mut self) -> Result<u64> {
        let file = open_input(&self.path)
            .await
            .context(|| format!("failed to open {}", self.path.display()))?;
        let size = file
            .metadata()
            .await
            .context(|| format!("failed to stat {}", self.path.display()))?
            .len();
        let total = total_records(size)?;
        let range = verification_range(total, self.shard, self.shard_count)?;
        advise_sequential(&file, range.start_offset(), range.end_offset() - range.start_offset());
        self.file = Some(file);

        debug!(
            start_record = range.start_record,
            end_record = range.end_record,
            "started verifying"
        );

        let mut start_offset = range.start_offset();
        let end_offset = range.end_offset();
        let mut previous: Option<Record> = None;
        // Absolute index of the next record read
        let mut index = range.start_record;

        while start_offset < end_offset {
            let file = self
                .file
                .as_mut()
                .ok_or_else(|| SortError::InvalidConfig("verified file is not open".to_string()))?;
            let budget = Some(self.budget.clone());
            let mut stream = RecordStream::open(file, start_offset, end_offset, budget)
                .await
                .context(|| format!("failed to seek {}", self.path.display()))?;

            while let Some(record) = stream.next().await {
                if let Some(prev) = &previous {
                    if self.order.compare(prev.as_bytes(), record.as_bytes()) == Ordering::Greater {
                        return Err(SortError::Verification(format!(
                            "{}: disorder: record {} sorts after record {}",
                            self.path.display(),
                            index - 1,
                            index
                        )));
                    }
                }
                previous = Some(record);
                index += 1;
            }

            let pulled = stream.yielded();
            match stream.take_end() {
                Some(StreamEnd::Failed(e)) => {
                    return Err(SortError::io(
                        format!("failed to read {}", self.path.display()),
                        e,
                    ));
                }
                Some(StreamEnd::MemoryPressure) if pulled == 0 => {
                    return Err(SortError::MemoryBudgetTooSmall {
                        budget: self.budget.limit(),
                    });
                }
                _ => {}
            }
            start_offset += pulled * RECORD_SIZE_U64;
        }

        self.file = None;
        let checked = index - range.start_record;
        debug!(records = checked, "verified shard");
        Ok(checked)
    }

    /// Close the file if a failed run left it open.
    pub fn stop(&mut self) {
        if self.file.take().is_some() {
            debug!("closed verified file");
        }
    }
}
