use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::error::{Result, SortError};
use crate::record::{MemoryBudget, RECORD_SIZE, RecordOrder};

/// Default total memory for buffered records, split evenly across shards.
pub const DEFAULT_BUFFER_SIZE: usize = 512 * 1024 * 1024;

/// Default depth of each merge input's transfer queue, in records.
pub const DEFAULT_PREFETCH: usize = 100;

/// Smallest per-shard budget: verification keeps the previous record alive
/// while reading the next one.
pub const MIN_SHARD_BUDGET: usize = 2 * RECORD_SIZE;

/// Configuration for a sharded external sort.
#[derive(Debug, Clone)]
pub struct SortConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Existing, empty working directory for intermediate files.
    pub temp_dir: PathBuf,
    pub shards: usize,
    /// Total bytes of records buffered across all shards.
    pub buffer_size: usize,
    pub prefetch: usize,
    pub order: RecordOrder,
    pub verify: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        SortConfig {
            input: PathBuf::new(),
            output: PathBuf::new(),
            temp_dir: PathBuf::new(),
            shards: default_shard_count(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            prefetch: DEFAULT_PREFETCH,
            order: RecordOrder::default(),
            verify: false,
        }
    }
}

impl SortConfig {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        SortConfig {
            input: input.into(),
            output: output.into(),
            temp_dir: temp_dir.into(),
            ..SortConfig::default()
        }
    }

    /// Bytes each shard may spend on buffered records.
    pub fn shard_budget_bytes(&self) -> usize {
        self.buffer_size / self.shards.max(1)
    }

    /// A fresh budget for one shard's phase.
    pub fn shard_budget(&self) -> MemoryBudget {
        MemoryBudget::new(self.shard_budget_bytes())
    }

    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 {
            return Err(SortError::InvalidConfig("shard count must be at least 1".to_string()));
        }
        if self.prefetch == 0 {
            return Err(SortError::InvalidConfig("prefetch depth must be at least 1".to_string()));
        }
        if self.shard_budget_bytes() < MIN_SHARD_BUDGET {
            return Err(SortError::MemoryBudgetTooSmall {
                budget: self.shard_budget_bytes(),
            });
        }
        if !self.temp_dir.is_dir() {
            return Err(SortError::InvalidConfig(format!(
                "temp directory '{}' doesn't exist or is not a directory",
                self.temp_dir.display()
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(SortError::InvalidConfig("output path is empty".to_string()));
        }
        Ok(())
    }
}

/// Number of shards to run when none is requested: one per available CPU.
pub fn default_shard_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Where the sorted result goes: `<input>.sorted`, or
/// `<output_dir>/<input file name>.sorted` when a directory is given.
pub fn default_output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    match output_dir {
        None => {
            let mut name = OsString::from(input.as_os_str());
            name.push(".sorted");
            PathBuf::from(name)
        }
        Some(dir) => {
            let mut name = input
                .file_name()
                .map(OsString::from)
                .unwrap_or_default();
            name.push(".sorted");
            dir.join(name)
        }
    }
}

/// Parse the `-S` memory size: bytes, or a K/M/G/T suffix for binary
/// multiples, or `b` for 512-byte blocks. The result is the total record
/// buffer, divided across shards by [`SortConfig::shard_budget_bytes`].
pub fn parse_buffer_size(s: &str) -> std::result::Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty buffer size".to_string());
    }

    let (num_part, suffix) = if s.ends_with(|c: char| c.is_ascii_alphabetic()) {
        let (n, s) = s.split_at(s.len() - 1);
        (n, s.chars().next())
    } else {
        (s, None)
    };

    let base: usize = num_part
        .parse()
        .map_err(|_| format!("invalid buffer size: {}", s))?;

    let multiplier = match suffix {
        Some('K') | Some('k') => 1024,
        Some('M') | Some('m') => 1024 * 1024,
        Some('G') | Some('g') => 1024 * 1024 * 1024,
        Some('T') | Some('t') => 1024usize.pow(4),
        Some('b') => 512,
        Some(c) => return Err(format!("invalid suffix '{}' in buffer size", c)),
        None => 1,
    };

    base.checked_mul(multiplier)
        .ok_or_else(|| format!("buffer size too large: {}", s))
}
