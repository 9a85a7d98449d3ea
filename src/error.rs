// src/error.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for a pump job.
//!
//! Every fatal condition maps to a stable process exit code so scripts can
//! distinguish guard aborts from integrity failures.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PumpError>;

#[derive(Debug, Error)]
pub enum PumpError {
    /// Invalid option combination or unparseable value. No side effects.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The positional path / filelist resolved to nothing writable.
    #[error("no targets resolved to pump")]
    NoTargets,

    /// Free-space pre-check failed for a device.
    #[error("not enough free space at {}: need {need} bytes (incl. margin), {free} free", .path.display())]
    DiskGuard { path: PathBuf, need: u64, free: u64 },

    /// `--times` exceeded the `--max-times` guard.
    #[error("refusing to write {requested} times (over --max-times {limit})")]
    TimesGuard { requested: u64, limit: u64 },

    /// Process RSS exceeded `--ram-limit`.
    #[error("RAM limit exceeded: rss {rss} > limit {limit}")]
    RamLimit { rss: u64, limit: u64 },

    /// Post-write re-read hash did not match the running hash.
    #[error("hash verification failed for {}", .path.display())]
    VerifyMismatch { path: PathBuf },

    /// Transient I/O retries ran out of budget, or a non-retried I/O failure.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// External cancellation observed; partial output retained.
    #[error("interrupted; partial output retained")]
    Cancelled,
}

impl PumpError {
    /// Wrap an I/O error with the target path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::NoTargets => 2,
            Self::DiskGuard { .. } | Self::TimesGuard { .. } => 3,
            Self::RamLimit { .. } => 4,
            Self::VerifyMismatch { .. } => 5,
            Self::Cancelled => 130,
            Self::Io { .. } => 1,
        }
    }
}
