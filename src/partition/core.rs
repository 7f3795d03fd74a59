//! Shard partition arithmetic shared by the sorting and verification passes.
use thiserror::Error;

use crate::record::RECORD_SIZE_U64;

/// Half-open record range `[start_record, end_record)` owned by one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRange {
    pub start_record: u64,
    pub end_record: u64,
}

impl ShardRange {
    pub fn len(&self) -> u64 {
        self.end_record - self.start_record
    }

    pub fn is_empty(&self) -> bool {
        self.start_record == self.end_record
    }

    /// Byte offset of the first record.
    pub fn start_offset(&self) -> u64 {
        self.start_record * RECORD_SIZE_U64
    }

    /// Byte offset one past the last record.
    pub fn end_offset(&self) -> u64 {
        self.end_record * RECORD_SIZE_U64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("file size {size} is not a multiple of the {record_size}-byte record size")]
    NotRecordAligned { size: u64, record_size: u64 },
    #[error(
        "{records} records cannot be split across {shards} shards (need more records than shards)"
    )]
    TooFewRecords { records: u64, shards: usize },
    #[error("shard count must be at least 1")]
    NoShards,
    #[error("shard {shard} is out of range for {shards} shards")]
    ShardOutOfRange { shard: usize, shards: usize },
}

/// Number of records in a file of `file_size` bytes.
pub fn total_records(file_size: u64) -> Result<u64, PartitionError> {
    if file_size % RECORD_SIZE_U64 != 0 {
        return Err(PartitionError::NotRecordAligned {
            size: file_size,
            record_size: RECORD_SIZE_U64,
        });
    }
    Ok(file_size / RECORD_SIZE_U64)
}

/// Range of records handled by `shard` out of `shard_count`.
///
/// Every shard gets `total_records / shard_count` records and the first
/// `total_records % shard_count` shards get one more, assigned in shard order.
pub fn shard_range(
    total_records: u64,
    shard: usize,
    shard_count: usize,
) -> Result<ShardRange, PartitionError> {
    if shard_count == 0 {
        return Err(PartitionError::NoShards);
    }
    if shard >= shard_count {
        return Err(PartitionError::ShardOutOfRange {
            shard,
            shards: shard_count,
        });
    }
    if total_records <= shard_count as u64 {
        return Err(PartitionError::TooFewRecords {
            records: total_records,
            shards: shard_count,
        });
    }

    let shards = shard_count as u64;
    let id = shard as u64;
    let base = total_records / shards;
    let remainder = total_records % shards;

    let start_record = base * id + id.min(remainder);
    let len = base + u64::from(id < remainder);
    Ok(ShardRange {
        start_record,
        end_record: start_record + len,
    })
}

/// Ranges for every shard, in shard order.
pub fn shard_ranges(
    total_records: u64,
    shard_count: usize,
) -> Result<Vec<ShardRange>, PartitionError> {
    (0..shard_count)
        .map(|shard| shard_range(total_records, shard, shard_count))
        .collect()
}

/// Shard range widened by one record on each side that borders another
/// shard. Checking order within every widened range covers each pair of
/// records straddling a shard boundary, so all shards passing implies the
/// whole file is sorted.
pub fn verification_range(
    total_records: u64,
    shard: usize,
    shard_count: usize,
) -> Result<ShardRange, PartitionError> {
    let range = shard_range(total_records, shard, shard_count)?;
    let start_record = if shard == 0 {
        range.start_record
    } else {
        range.start_record - 1
    };
    let end_record = if shard + 1 == shard_count {
        range.end_record
    } else {
        range.end_record + 1
    };
    Ok(ShardRange {
        start_record,
        end_record,
    })
}
