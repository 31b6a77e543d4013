//! Streaming view queries.

/// This module contains the row processor and its settlement guard.
pub mod processor;
/// This module contains the incremental JSON scanner.
pub mod scanner;

pub use processor::{RowStreamProcessor, Settlement};
pub use scanner::RowScanner;
