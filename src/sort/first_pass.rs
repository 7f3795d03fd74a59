use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use super::config::SortConfig;
use super::error::{IoContext, Result, SortError};
use super::naming::batch_file_name;
use crate::common::io::{advise_sequential, open_input, preallocate};
use crate::partition::{shard_range, total_records};
use crate::record::{
    MemoryBudget, RECORD_SIZE, RECORD_SIZE_U64, Record, RecordOrder, RecordStream, StreamEnd,
    sort_batch,
};

/// 1MB write buffer for batch files.
const WRITE_BUF_SIZE: usize = 256 * RECORD_SIZE;

/// First pass: reads one shard's slice of the input, sorts as many records
/// as the memory budget allows at a time, and spills each sorted run to its
/// own batch file.
pub struct PartitionSortWorker {
    shard: usize,
    shard_count: usize,
    input: PathBuf,
    temp_dir: PathBuf,
    order: RecordOrder,
    budget: MemoryBudget,
    file: Option<File>,
    start_offset: u64,
    end_offset: u64,
    batches: usize,
    records: u64,
}

impl PartitionSortWorker {
    pub fn new(
        shard: usize,
        shard_count: usize,
        input: &Path,
        temp_dir: &Path,
        order: RecordOrder,
        budget: MemoryBudget,
    ) -> Self {
        PartitionSortWorker {
            shard,
            shard_count,
            input: input.to_path_buf(),
            temp_dir: temp_dir.to_path_buf(),
            order,
            budget,
            file: None,
            start_offset: 0,
            end_offset: 0,
            batches: 0,
            records: 0,
        }
    }

    pub fn from_config(config: &SortConfig, shard: usize) -> Self {
        Self::new(
            shard,
            config.shards,
            &config.input,
            &config.temp_dir,
            config.order,
            config.shard_budget(),
        )
    }

    /// Open the input and compute this shard's byte range.
    pub async fn init(&mut self) -> Result<()> {
        let file = open_input(&self.input)
            .await
            .context(|| format!("failed to open {}", self.input.display()))?;
        let size = file
            .metadata()
            .await
            .context(|| format!("failed to stat {}", self.input.display()))?
            .len();
        let total = total_records(size)?;
        let range = shard_range(total, self.shard, self.shard_count)?;

        self.start_offset = range.start_offset();
        self.end_offset = range.end_offset();
        advise_sequential(&file, self.start_offset, self.end_offset - self.start_offset);
        self.file = Some(file);

        debug!(
            start_offset = self.start_offset,
            end_offset = self.end_offset,
            records = range.len(),
            "computed shard range"
        );
        Ok(())
    }

    /// Sort the shard into batch files; returns how many were written.
    pub async fn run(&mut self) -> Result<usize> {
        if self.file.is_none() {
            self.init().await?;
        }
        debug!("starting first pass");

        while self.start_offset < self.end_offset {
            let mut batch = Vec::new();
            let end = {
                let file = self
                    .file
                    .as_mut()
                    .ok_or_else(|| SortError::InvalidConfig("input file is not open".to_string()))?;
                let mut stream = RecordStream::open(
                    file,
                    self.start_offset,
                    self.end_offset,
                    Some(self.budget.clone()),
                )
                .await
                .context(|| format!("failed to seek {}", self.input.display()))?;
                while let Some(record) = stream.next().await {
                    batch.push(record);
                }
                stream.take_end()
            };

            match end {
                Some(StreamEnd::Failed(e)) => {
                    return Err(SortError::io(
                        format!("failed to read {}", self.input.display()),
                        e,
                    ));
                }
                Some(StreamEnd::MemoryPressure) if batch.is_empty() => {
                    return Err(SortError::MemoryBudgetTooSmall {
                        budget: self.budget.limit(),
                    });
                }
                _ => {}
            }

            // A short batch means memory ran out; the next iteration resumes
            // right after the last record read.
            self.start_offset += batch.len() as u64 * RECORD_SIZE_U64;
            self.records += batch.len() as u64;

            sort_batch(&mut batch, self.order);
            self.write_batch(batch).await?;
        }

        debug!(
            records = self.records,
            batches = self.batches,
            "first pass completed"
        );

        self.file = None;
        Ok(self.batches)
    }

    /// Close the input if it is still open. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.file.take().is_some() {
            debug!("closed input file");
        }
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    async fn write_batch(&mut self, batch: Vec<Record>) -> Result<()> {
        let path = batch_file_name(&self.temp_dir, self.shard, self.batches);
        self.batches += 1;

        let file = File::create(&path)
            .await
            .context(|| format!("failed to create {}", path.display()))?;
        preallocate(&file, batch.len() as u64 * RECORD_SIZE_U64)
            .await
            .context(|| format!("failed to allocate {}", path.display()))?;

        let len = batch.len();
        let mut writer = BufWriter::with_capacity(WRITE_BUF_SIZE, file);
        // Each record is dropped once written, handing its memory back.
        for record in batch {
            writer
                .write_all(record.as_bytes())
                .await
                .context(|| format!("failed to write {}", path.display()))?;
        }
        writer
            .flush()
            .await
            .context(|| format!("failed to write {}", path.display()))?;

        debug!(batch = self.batches - 1, records = len, "wrote batch file");
        Ok(())
    }
}
