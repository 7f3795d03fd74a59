use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, debug_span, warn};

use super::config::{DEFAULT_PREFETCH, SortConfig};
use super::error::{IoContext, Result, SortError};
use super::naming::{batch_file_name, merged_file_name};
use crate::common::io::{is_cross_device, open_input, sync_directory};
use crate::partition::total_records;
use crate::record::{
    MemoryBudget, RECORD_SIZE, RECORD_SIZE_U64, Record, RecordOrder, RecordStream, StreamEnd,
};

/// 1MB write buffer for the merged output.
const WRITE_BUF_SIZE: usize = 256 * RECORD_SIZE;

/// Maps an input index in `0..K` to the file holding that input.
pub type InputNameFn = Box<dyn Fn(usize) -> PathBuf + Send + Sync>;

/// Which phase a merge worker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRole {
    /// Merge one shard's batch files into its per-shard file.
    Local { shard: usize },
    /// Merge every shard's file into the output file.
    Final,
}

/// Item on a transfer queue between a producer and the merge consumer.
#[derive(Debug)]
enum Transfer {
    Record(Record),
    End,
}

/// Outcome of one merge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    pub inputs: usize,
    pub records: u64,
    /// End-of-stream markers the consumer saw; equals `inputs` on a merge.
    pub end_markers: usize,
    /// The single input was renamed into place instead of merged.
    pub renamed: bool,
}

/// K-way merge of sorted record files.
///
/// Each input gets a producer task feeding a bounded queue; the consumer
/// keeps one head record per unfinished input in a min-heap and appends the
/// smallest to the output. Producers delete their input only after the
/// consumer has drained every queue.
pub struct MergeWorker {
    role: MergeRole,
    temp_dir: PathBuf,
    input_count: usize,
    input_name: InputNameFn,
    output: PathBuf,
    order: RecordOrder,
    prefetch: usize,
    input_budget: Option<MemoryBudget>,
}

impl MergeWorker {
    pub fn new(
        role: MergeRole,
        temp_dir: &Path,
        input_count: usize,
        input_name: InputNameFn,
        output: &Path,
    ) -> Self {
        MergeWorker {
            role,
            temp_dir: temp_dir.to_path_buf(),
            input_count,
            input_name,
            output: output.to_path_buf(),
            order: RecordOrder::default(),
            prefetch: DEFAULT_PREFETCH,
            input_budget: None,
        }
    }

    /// Merge `batch_count` first-pass batches of `shard`.
    pub fn local(temp_dir: &Path, shard: usize, batch_count: usize) -> Self {
        let dir = temp_dir.to_path_buf();
        Self::new(
            MergeRole::Local { shard },
            temp_dir,
            batch_count,
            Box::new(move |batch| batch_file_name(&dir, shard, batch)),
            &merged_file_name(temp_dir, shard),
        )
    }

    /// Merge the per-shard files of `shard_count` shards into `output`.
    pub fn final_pass(temp_dir: &Path, shard_count: usize, output: &Path) -> Self {
        let dir = temp_dir.to_path_buf();
        Self::new(
            MergeRole::Final,
            temp_dir,
            shard_count,
            Box::new(move |shard| merged_file_name(&dir, shard)),
            output,
        )
    }

    pub fn with_order(mut self, order: RecordOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Charge records read by producers against `budget`.
    #[cfg(test)]
    pub(super) fn with_input_budget(mut self, budget: MemoryBudget) -> Self {
        self.input_budget = Some(budget);
        self
    }

    /// Apply the record order and queue depth from `config`.
    pub fn configured(self, config: &SortConfig) -> Self {
        self.with_order(config.order).with_prefetch(config.prefetch)
    }

    pub fn role(&self) -> MergeRole {
        self.role
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub async fn run(&self) -> Result<MergeReport> {
        debug!(role = ?self.role, inputs = self.input_count, "starting merge");
        let report = match self.input_count {
            0 => return Err(SortError::NoMergeInputs),
            1 => self.rename_single_input().await?,
            k => self.merge_inputs(k).await?,
        };
        debug!(records = report.records, renamed = report.renamed, "completed merge");
        Ok(report)
    }

    /// Nothing is held open between runs; producers and the output file are
    /// released before `run` returns, on success and on failure.
    pub fn stop(&mut self) {
        debug!(role = ?self.role, "stopping merge worker");
    }

    /// One input is already sorted: move it into place.
    async fn rename_single_input(&self) -> Result<MergeReport> {
        let from = (self.input_name)(0);
        let size = tokio::fs::metadata(&from)
            .await
            .context(|| format!("failed to stat {}", from.display()))?
            .len();

        match tokio::fs::rename(&from, &self.output).await {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                tokio::fs::copy(&from, &self.output).await.context(|| {
                    format!("failed to copy {} to {}", from.display(), self.output.display())
                })?;
                tokio::fs::remove_file(&from)
                    .await
                    .context(|| format!("failed to remove {}", from.display()))?;
            }
            Err(e) => {
                return Err(SortError::io(
                    format!("failed to rename {} to {}", from.display(), self.output.display()),
                    e,
                ));
            }
        }

        sync_directory(&self.temp_dir)
            .await
            .context(|| format!("failed to sync {}", self.temp_dir.display()))?;
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() && parent != self.temp_dir {
                sync_directory(parent)
                    .await
                    .context(|| format!("failed to sync {}", parent.display()))?;
            }
        }

        Ok(MergeReport {
            inputs: 1,
            records: total_records(size)?,
            end_markers: 0,
            renamed: true,
        })
    }

    async fn merge_inputs(&self, k: usize) -> Result<MergeReport> {
        // Producers block on this after their end marker; the consumer hands
        // out one permit per input once every queue is drained.
        let gate = Arc::new(Semaphore::new(0));
        let mut receivers = Vec::with_capacity(k);
        let mut producers = JoinSet::new();

        for index in 0..k {
            let (tx, rx) = mpsc::channel(self.prefetch);
            receivers.push(rx);
            let path = (self.input_name)(index);
            let producer = produce(index, path, tx, Arc::clone(&gate), self.input_budget.clone());
            producers.spawn(producer.instrument(debug_span!("producer", index)));
        }

        match self.consume(&mut receivers).await {
            Ok(report) => {
                gate.add_permits(k);
                drop(receivers);
                while let Some(joined) = producers.join_next().await {
                    joined??;
                }
                // Input deletions must be durable before the phase completes.
                sync_directory(&self.temp_dir)
                    .await
                    .context(|| format!("failed to sync {}", self.temp_dir.display()))?;
                Ok(report)
            }
            Err(err) => {
                // Closing the gate lets blocked producers exit without
                // deleting inputs the merge never finished with.
                gate.close();
                drop(receivers);
                let mut first_producer_err = None;
                while let Some(joined) = producers.join_next().await {
                    match joined {
                        Ok(Err(e)) if first_producer_err.is_none() => first_producer_err = Some(e),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "merge producer task failed"),
                    }
                }
                // A disconnected queue is only a symptom; report its cause.
                match (err, first_producer_err) {
                    (SortError::ProducerDisconnected { .. }, Some(cause)) => Err(cause),
                    (err, _) => Err(err),
                }
            }
        }
    }

    async fn consume(&self, receivers: &mut [mpsc::Receiver<Transfer>]) -> Result<MergeReport> {
        let file = File::create(&self.output)
            .await
            .context(|| format!("failed to create {}", self.output.display()))?;
        let mut writer = BufWriter::with_capacity(WRITE_BUF_SIZE, file);

        let mut report = MergeReport {
            inputs: receivers.len(),
            ..MergeReport::default()
        };
        let mut heap: BinaryHeap<Reverse<MergeEntry>> = BinaryHeap::with_capacity(receivers.len());

        // Seed the heap with the head of every input
        for (source, rx) in receivers.iter_mut().enumerate() {
            match next_transfer(rx, source).await? {
                Transfer::Record(record) => heap.push(Reverse(MergeEntry {
                    record,
                    source,
                    order: self.order,
                })),
                Transfer::End => report.end_markers += 1,
            }
        }

        while let Some(Reverse(min)) = heap.pop() {
            writer
                .write_all(min.record.as_bytes())
                .await
                .context(|| format!("failed to write {}", self.output.display()))?;
            report.records += 1;

            let source = min.source;
            drop(min);
            match next_transfer(&mut receivers[source], source).await? {
                Transfer::Record(record) => heap.push(Reverse(MergeEntry {
                    record,
                    source,
                    order: self.order,
                })),
                Transfer::End => report.end_markers += 1,
            }
        }

        writer
            .flush()
            .await
            .context(|| format!("failed to write {}", self.output.display()))?;

        debug_assert_eq!(report.end_markers, report.inputs);
        Ok(report)
    }
}

impl fmt::Debug for MergeWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeWorker")
            .field("role", &self.role)
            .field("temp_dir", &self.temp_dir)
            .field("input_count", &self.input_count)
            .field("output", &self.output)
            .field("order", &self.order)
            .field("prefetch", &self.prefetch)
            .field("input_budget", &self.input_budget)
            .finish()
    }
}

async fn next_transfer(rx: &mut mpsc::Receiver<Transfer>, index: usize) -> Result<Transfer> {
    rx.recv()
        .await
        .ok_or(SortError::ProducerDisconnected { index })
}

/// Stream one input into its queue, mark its end, then wait for the gate
/// before deleting the input.
async fn produce(
    index: usize,
    path: PathBuf,
    tx: mpsc::Sender<Transfer>,
    gate: Arc<Semaphore>,
    budget: Option<MemoryBudget>,
) -> Result<()> {
    let file = open_input(&path)
        .await
        .context(|| format!("failed to open {}", path.display()))?;
    let size = file
        .metadata()
        .await
        .context(|| format!("failed to stat {}", path.display()))?
        .len();
    total_records(size)?;

    let mut stream = RecordStream::open(file, 0, size, budget)
        .await
        .context(|| format!("failed to open {}", path.display()))?;
    while let Some(record) = stream.next().await {
        if tx.send(Transfer::Record(record)).await.is_err() {
            // Consumer gone; it reports its own failure.
            return Ok(());
        }
    }
    // The end marker promises the whole input was sent.
    match stream.take_end() {
        Some(StreamEnd::EndOfRange) if stream.offset() == size => {}
        Some(StreamEnd::Failed(e)) => {
            return Err(SortError::io(format!("failed to read {}", path.display()), e));
        }
        _ => {
            return Err(SortError::IncompleteInput {
                path,
                read: stream.yielded(),
                expected: size / RECORD_SIZE_U64,
            });
        }
    }
    if tx.send(Transfer::End).await.is_err() {
        return Ok(());
    }
    drop(tx);

    match gate.acquire().await {
        Ok(permit) => permit.forget(),
        Err(_) => return Ok(()),
    }

    drop(stream);
    tokio::fs::remove_file(&path)
        .await
        .context(|| format!("failed to remove {}", path.display()))?;
    debug!(index, records = size / RECORD_SIZE_U64, "consumed merge input");
    Ok(())
}

/// Entry in the merge heap: the current head record of input `source`.
/// Equal records are ordered by source index.
struct MergeEntry {
    record: Record,
    source: usize,
    order: RecordOrder,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.order.compare(self.record.as_bytes(), other.record.as_bytes()) {
            Ordering::Equal => self.source.cmp(&other.source),
            ord => ord,
        }
    }
}
