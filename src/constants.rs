// src/constants.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Default chunk size for generation and writes (64 KiB)
/// Large enough to amortize syscall cost, small enough that rate and CPU
/// throttles react within a fraction of a second at typical speeds.
pub const DEFAULT_CHUNK: usize = 64 * 1024;

/// Default periodic fsync interval when durability is enabled (8 MiB)
pub const DEFAULT_FSYNC_INTERVAL: u64 = 8 * 1024 * 1024;

/// Default RAM ceiling for buffer-then-dump mode (256 MiB)
pub const DEFAULT_RAM_MAX: u64 = 256 * 1024 * 1024;

/// Default extra free space required beyond the expected output (100 MiB)
pub const DEFAULT_DISK_GUARD_MARGIN: u64 = 100 * 1024 * 1024;

/// Upper guard for `--times` before any file is opened
pub const DEFAULT_MAX_TIMES: u64 = 10_000_000;

/// Default tolerated transient write errors per job
pub const DEFAULT_ERROR_BUDGET: u32 = 10;

/// First retry delay after a transient I/O error (doubles per attempt)
pub const RETRY_BACKOFF_BASE_MS: u64 = 10;

/// Ceiling for the per-attempt retry delay
pub const RETRY_BACKOFF_CAP_MS: u64 = 500;

/// Chunks between CPU / RSS samples; keeps the throttles off the hot path
pub const THROTTLE_SAMPLE_EVERY: u32 = 32;

/// Longest single sleep while waiting on the rate bucket
pub const RATE_SLEEP_CAP_MS: u64 = 100;

/// Pipeline queue capacity as a multiple of the generator count
pub const PIPELINE_QUEUE_FACTOR: usize = 4;

/// Read block size for post-write hash verification (1 MiB)
pub const VERIFY_READ_BLOCK: usize = 1024 * 1024;
