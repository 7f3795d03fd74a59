#![allow(
    clippy::collapsible_if,
    clippy::len_without_is_empty,
    clippy::manual_div_ceil,
    clippy::too_many_arguments
)]

/// Use mimalloc as the global allocator for all binaries.
/// Record buffers are allocated and freed at high rates from every shard
/// thread, which mimalloc's thread-local caching handles well.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod common;
pub mod partition;
pub mod record;
pub mod sort;
