use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{Instrument, error, info, info_span};

use super::config::SortConfig;
use super::error::{IoContext, Result, SortError};
use super::first_pass::PartitionSortWorker;
use super::merge::{MergeReport, MergeWorker};
use super::verify::VerifyWorker;
use crate::common::io::file_size;
use crate::partition::total_records;
use crate::record::RecordOrder;

/// Outcome of a completed sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSummary {
    pub records: u64,
    /// Batch files written by each shard in the first pass.
    pub batches: Vec<usize>,
    pub verified: bool,
    pub elapsed: Duration,
}

/// One OS thread per shard. A phase is broadcast to every thread and the
/// caller blocks until all of them finish, which is the barrier between
/// phases. Each thread drives its phase on its own single-threaded runtime.
pub struct ShardPool {
    pool: rayon::ThreadPool,
}

impl ShardPool {
    pub fn new(shards: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(shards)
            .thread_name(|i| format!("shard-{}", i))
            .build()
            .map_err(|e| {
                SortError::InvalidConfig(format!("failed to start shard threads: {}", e))
            })?;
        Ok(ShardPool { pool })
    }

    /// Run `phase(shard)` on every shard and collect the results in shard
    /// order.
    pub fn broadcast<T, F, Fut>(&self, phase: F) -> Vec<Result<T>>
    where
        F: Fn(usize) -> Fut + Sync,
        Fut: Future<Output = Result<T>>,
        T: Send,
    {
        let mut results: Vec<(usize, Result<T>)> = self.pool.broadcast(|ctx| {
            let shard = ctx.index();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(|| "failed to start shard runtime".to_string())?;
                runtime.block_on(phase(shard).instrument(info_span!("shard", id = shard)))
            }));
            (shard, outcome.unwrap_or(Err(SortError::WorkerPanicked(shard))))
        });
        results.sort_by_key(|(shard, _)| *shard);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

/// Wait-all result of one phase: logs every failed shard and returns the
/// first failure, or every shard's output in shard order.
fn collect_phase<T>(phase: &str, results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut first_err = None;
    for (shard, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => values.push(value),
            Err(e) => {
                error!(shard, error = %e, "{} failed", phase);
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(values),
    }
}

async fn first_pass(config: &SortConfig, shard: usize) -> Result<usize> {
    let mut worker = PartitionSortWorker::from_config(config, shard);
    let result = async {
        worker.init().await?;
        worker.run().await
    }
    .await;
    worker.stop();
    result
}

async fn local_merge(config: &SortConfig, shard: usize, batches: usize) -> Result<MergeReport> {
    let mut worker = MergeWorker::local(&config.temp_dir, shard, batches).configured(config);
    let result = worker.run().await;
    worker.stop();
    result
}

async fn final_merge(config: &SortConfig) -> Result<MergeReport> {
    let mut worker =
        MergeWorker::final_pass(&config.temp_dir, config.shards, &config.output).configured(config);
    let result = worker.run().await;
    worker.stop();
    result
}

async fn verify_shard(
    path: &Path,
    shard: usize,
    shard_count: usize,
    order: RecordOrder,
    config: &SortConfig,
) -> Result<u64> {
    let mut worker = VerifyWorker::new(shard, shard_count, path, order, config.shard_budget());
    let result = worker.run().await;
    worker.stop();
    result
}

/// Sort `config.input` into `config.output` using `config.temp_dir` for
/// intermediate files.
///
/// Phases: sort batches per shard, merge each shard's batches, merge all
/// shards into the output, then optionally verify the output. Each phase
/// completes on every shard before the next starts; the first failure stops
/// the sort after the failing phase.
pub fn external_sort(config: &SortConfig) -> Result<SortSummary> {
    config.validate()?;
    let started = Instant::now();
    let pool = ShardPool::new(config.shards)?;

    info!(
        input = %config.input.display(),
        shards = config.shards,
        order = %config.order,
        "starting external sort"
    );

    info!("running first pass");
    let batches = collect_phase(
        "first pass",
        pool.broadcast(|shard| first_pass(config, shard)),
    )?;
    info!(batches = batches.iter().sum::<usize>(), "completed first pass");

    info!("running second pass");
    let batches_ref = &batches;
    collect_phase(
        "second pass",
        pool.broadcast(|shard| local_merge(config, shard, batches_ref[shard])),
    )?;
    info!("completed second pass");

    // Final merge runs on shard 1 when there is one, else shard 0.
    // Shard 0 typically finishes its local merge first; run the final merge elsewhere.
    let final_shard = if config.shards > 1 { 1 } else { 0 };
    let reports = collect_phase(
        "final pass",
        pool.broadcast(|shard| async move {
            if shard == final_shard {
                final_merge(config).await.map(Some)
            } else {
                Ok(None)
            }
        }),
    )?;
    let records: u64 = reports
        .into_iter()
        .flatten()
        .map(|report| report.records)
        .sum();
    info!(output = %config.output.display(), records, "completed sorting");

    if config.verify {
        info!("verifying sorted output");
        collect_phase(
            "verification",
            pool.broadcast(|shard| {
                verify_shard(&config.output, shard, config.shards, config.order, config)
            }),
        )?;
        info!("output verified");
    }

    let summary = SortSummary {
        records,
        batches,
        verified: config.verify,
        elapsed: started.elapsed(),
    };
    info!(elapsed_ms = summary.elapsed.as_millis() as u64, "external sort finished");
    Ok(summary)
}

/// Verify that `path` is sorted under `config.order` without sorting it.
///
/// Uses up to `config.shards` shards, fewer when the file is too small to
/// give every shard a record. Returns the number of records in the file.
pub fn check_sorted(path: &Path, config: &SortConfig) -> Result<u64> {
    let size = file_size(path).context(|| format!("failed to stat {}", path.display()))?;
    let total = total_records(size)?;
    if total < 2 {
        return Ok(total);
    }
    let shards = config.shards.clamp(1, (total - 1) as usize);
    let pool = ShardPool::new(shards)?;

    info!(path = %path.display(), shards, "checking sort order");
    collect_phase(
        "verification",
        pool.broadcast(|shard| verify_shard(path, shard, shards, config.order, config)),
    )?;
    Ok(total)
}
