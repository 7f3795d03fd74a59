pub mod config;
pub mod error;
pub mod first_pass;
pub mod merge;
pub mod naming;
pub mod orchestrator;
pub mod verify;


pub use self::config::*;
pub use self::error::{Result, SortError};
pub use self::first_pass::PartitionSortWorker;
pub use self::merge::{InputNameFn, MergeReport, MergeRole, MergeWorker};
pub use self::naming::*;
pub use self::orchestrator::*;
pub use self::verify::VerifyWorker;
