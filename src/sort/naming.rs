//! Names of the intermediate files inside the temp working directory.

use std::path::{Path, PathBuf};

/// Sorted run number `batch` written by `shard` during the first pass.
pub fn batch_file_name(temp_dir: &Path, shard: usize, batch: usize) -> PathBuf {
    temp_dir.join(format!("sorted_batch_{}_{}", shard, batch))
}

/// Single sorted file per shard produced by the local merge.
pub fn merged_file_name(temp_dir: &Path, shard: usize) -> PathBuf {
    temp_dir.join(format!("final_sorted_{}", shard))
}
