use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::common::io_error_msg;
use crate::partition::PartitionError;
use crate::record::RECORD_SIZE;

#[derive(Debug, Error)]
pub enum SortError {
    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no input files to merge")]
    NoMergeInputs,

    #[error(
        "memory budget of {budget} bytes per shard cannot buffer a {} byte record",
        RECORD_SIZE
    )]
    MemoryBudgetTooSmall { budget: usize },

    #[error("{context}: {}", io_error_msg(.source))]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{}: stopped after {read} of {expected} records", .path.display())]
    IncompleteInput {
        path: PathBuf,
        read: u64,
        expected: u64,
    },

    #[error("merge input {index} closed before its end of stream")]
    ProducerDisconnected { index: usize },

    #[error("merge producer task failed: {0}")]
    ProducerTask(#[from] tokio::task::JoinError),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("shard {0} worker panicked")]
    WorkerPanicked(usize),
}

impl SortError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        SortError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_verification(&self) -> bool {
        matches!(self, SortError::Verification(_))
    }
}

pub type Result<T> = std::result::Result<T, SortError>;

/// Attach a lazily built context message to an I/O result.
pub(crate) trait IoContext<T> {
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|source| SortError::io(f(), source))
    }
}
