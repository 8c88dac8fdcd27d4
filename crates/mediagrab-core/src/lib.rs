//! mediagrab Core - Download Queue Engine
//!
//! This crate turns lists of discovered media URLs into files on disk.
//! It handles filename derivation, bounded-concurrency downloading with
//! retries, pause/resume/cancel, and progress reporting.

mod error;
mod filename;
mod platform;
mod queue;
mod storage;

pub use error::*;
pub use filename::*;
pub use platform::*;
pub use queue::*;
pub use storage::*;
