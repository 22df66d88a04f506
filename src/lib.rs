//! streambridge - Stream text records through a child process.
//!
//! The [`bridge::Bridge`] spawns a child, writes records to its stdin and
//! harvests the records it prints as `(index, text)` tuples, grouped into
//! batches that the host drains at its own pace.

pub mod bridge;
pub mod config;
pub mod display;
pub mod environment;
pub mod operation;
