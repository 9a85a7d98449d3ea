// src/lib.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Guardrailed file pumping: synthetic token and byte streams written to
//! files, directory trees, filelists, or standard output.
//!
//! This library provides:
//! - Pluggable token sources (fixed word, dictionaries, word-level N-gram
//!   models, constant fills, random binary/text/hex) behind one `next_chunk`
//! - Four writing strategies with identical external effect: streaming,
//!   RAM buffer-then-dump, multi-writer on a shared handle, and a
//!   generator pipeline feeding a single writer
//! - Cross-cutting policies: rate limiting, CPU throttling, RAM watching,
//!   periodic fsync, sparse-file skipping, running hashes with
//!   verify-on-close, and I/O retries against an error budget
//! - Pre-flight guards for repetition counts and per-device free disk space

// Core modules
pub mod bench;
pub mod cli;
pub mod config;
pub mod constants;
pub mod dict;
pub mod error;
pub mod guard;
pub mod integrity;
pub mod job;
pub mod markov;
pub mod pump;
pub mod targets;
pub mod throttle;
pub mod token;
pub mod units;

// Re-export main API
pub use config::{BufferMode, Compression, Concurrency, JobConfig, WriteMode};
pub use error::{PumpError, Result};
pub use job::JobController;
pub use targets::Target;
pub use throttle::CancelToken;
pub use token::{PumpMode, SourceSpec, TokenSource};
