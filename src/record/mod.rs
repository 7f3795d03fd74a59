pub mod budget;
pub mod core;
pub mod stream;

#[cfg(test)]
mod tests;

pub use self::budget::*;
pub use self::core::*;
pub use self::stream::*;
