/// Fixed-size record type and the orders records can be sorted by.
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::budget::{MemoryBudget, MemoryLease};

/// Size of every record, in bytes. Input and output files are a flat
/// sequence of blocks of exactly this size.
pub const RECORD_SIZE: usize = 4 * 1024;

/// `RECORD_SIZE` as a file offset.
pub const RECORD_SIZE_U64: u64 = RECORD_SIZE as u64;

/// Total order used to sort records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordOrder {
    /// Unconditional lexicographic comparison of all `RECORD_SIZE` bytes.
    #[default]
    Bytes,
    /// C-string comparison: stops at the first zero byte in either record,
    /// like `strncmp(a, b, RECORD_SIZE)`. Bytes after an embedded zero are
    /// ignored, so records differing only there compare equal.
    NulTerminated,
}

impl RecordOrder {
    #[inline]
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            RecordOrder::Bytes => a.cmp(b),
            RecordOrder::NulTerminated => compare_nul_terminated(a, b),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordOrder::Bytes => "bytes",
            RecordOrder::NulTerminated => "nul-terminated",
        }
    }
}

impl FromStr for RecordOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(RecordOrder::Bytes),
            "nul-terminated" | "cstring" => Ok(RecordOrder::NulTerminated),
            _ => Err(format!(
                "invalid record order '{}' (expected 'bytes' or 'nul-terminated')",
                s
            )),
        }
    }
}

impl fmt::Display for RecordOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compare at most `RECORD_SIZE` bytes, treating the first zero byte (or the
/// end of a shorter slice) as a terminator. Bytes compare unsigned.
#[inline]
pub fn compare_nul_terminated(a: &[u8], b: &[u8]) -> Ordering {
    let limit = a.len().max(b.len()).min(RECORD_SIZE);
    for i in 0..limit {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return x.cmp(&y);
        }
        if x == 0 {
            break;
        }
    }
    Ordering::Equal
}

/// One `RECORD_SIZE` block. Moved between containers, never cloned.
///
/// A record allocated against a [`MemoryBudget`] carries its lease and hands
/// the bytes back when dropped.
pub struct Record {
    data: Box<[u8]>,
    _lease: Option<MemoryLease>,
}

impl Record {
    /// Allocate a zeroed record, charging `budget` when one is given.
    ///
    /// Returns `None` when the budget is exhausted or the allocator refuses
    /// the reservation; callers treat both as memory pressure.
    pub fn try_allocate(budget: Option<&MemoryBudget>) -> Option<Self> {
        let lease = match budget {
            Some(budget) => Some(budget.try_lease(RECORD_SIZE)?),
            None => None,
        };
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(RECORD_SIZE).ok()?;
        buf.resize(RECORD_SIZE, 0);
        Some(Record {
            data: buf.into_boxed_slice(),
            _lease: lease,
        })
    }

    /// Build a record whose leading bytes are `prefix`, zero padded.
    /// A prefix longer than `RECORD_SIZE` is truncated.
    pub fn with_prefix(prefix: &[u8]) -> Self {
        let mut data = vec![0u8; RECORD_SIZE].into_boxed_slice();
        let n = prefix.len().min(RECORD_SIZE);
        data[..n].copy_from_slice(&prefix[..n]);
        Record { data, _lease: None }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.data.iter().position(|&b| b == 0).unwrap_or(16).min(16);
        write!(
            f,
            "Record({:?}..)",
            String::from_utf8_lossy(&self.data[..shown])
        )
    }
}

/// Sort a batch of records in place under `order`.
pub fn sort_batch(batch: &mut [Record], order: RecordOrder) {
    batch.sort_unstable_by(|a, b| order.compare(a.as_bytes(), b.as_bytes()));
}
