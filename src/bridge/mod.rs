//! Streaming subprocess bridge.
//!
//! Feeds text records to a child process on stdin and harvests the records
//! it prints, delivering them as [`Tuple`]s grouped into batches.

mod decode;
mod error;
mod process;
mod reader;
mod splitter;
mod types;

pub use error::*;
pub use process::*;
pub use reader::{ReaderExit, ReaderSummary};
pub use splitter::*;
pub use types::*;
