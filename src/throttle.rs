// src/throttle.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared throttles and counters: rate bucket, CPU limit, RSS watch,
//! progress reporting, and the cancellation flag.
//!
//! The rate bucket is the only hot shared structure, so it is a single
//! atomic counter with bounded sleeps; everything else samples every
//! [`THROTTLE_SAMPLE_EVERY`](crate::constants::THROTTLE_SAMPLE_EVERY)
//! chunks to stay off the write path.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::{RATE_SLEEP_CAP_MS, THROTTLE_SAMPLE_EVERY};
use crate::error::{PumpError, Result};
use crate::units::{fmt_bytes, fmt_eta};

/// Shared cancellation flag, checked before each chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Byte-counted token bucket anchored on a monotonic clock.
///
/// `acquire` books the bytes first, then waits until the long-run budget
/// covers them. Workers under multi-writer share one bucket, so slack left
/// by a slow worker is picked up by the others automatically.
#[derive(Debug)]
pub struct RateBucket {
    rate: u64,
    start: Instant,
    consumed: AtomicU64,
}

impl RateBucket {
    pub fn new(rate_bps: u64) -> Self {
        Self { rate: rate_bps.max(1), start: Instant::now(), consumed: AtomicU64::new(0) }
    }

    /// Block until `n` bytes of budget are available.
    pub fn acquire(&self, n: u64) {
        let total = self.consumed.fetch_add(n, Ordering::Relaxed) + n;
        loop {
            let allowed = (self.start.elapsed().as_secs_f64() * self.rate as f64) as u64;
            if total <= allowed {
                return;
            }
            let deficit_secs = (total - allowed) as f64 / self.rate as f64;
            let nap = Duration::from_secs_f64(deficit_secs)
                .min(Duration::from_millis(RATE_SLEEP_CAP_MS));
            thread::sleep(nap.max(Duration::from_micros(100)));
        }
    }
}

/// Best-effort CPU percentage limiter over process CPU time.
///
/// Percentage is normalized by logical CPU count, so 100 means one fully
/// busy core on a one-core box. Sampling happens every K calls and a single
/// check never sleeps longer than one progress interval.
#[derive(Debug)]
pub struct CpuThrottle {
    limit_pct: f64,
    ncpu: f64,
    wall_start: Instant,
    cpu_start: Duration,
    max_sleep: Duration,
    calls: AtomicU32,
}

impl CpuThrottle {
    /// `None` when the platform cannot report process CPU time.
    pub fn new(limit_pct: f64, progress_interval: Duration) -> Option<Self> {
        let cpu_start = process_cpu_time()?;
        Some(Self {
            limit_pct,
            ncpu: num_cpus::get().max(1) as f64,
            wall_start: Instant::now(),
            cpu_start,
            max_sleep: progress_interval,
            calls: AtomicU32::new(0),
        })
    }

    pub fn maybe_throttle(&self) {
        if self.calls.fetch_add(1, Ordering::Relaxed) % THROTTLE_SAMPLE_EVERY != 0 {
            return;
        }
        let mut slept = Duration::ZERO;
        while slept < self.max_sleep {
            let Some(cpu) = process_cpu_time() else { return };
            let elapsed = self.wall_start.elapsed().as_secs_f64().max(1e-6);
            let used = cpu.saturating_sub(self.cpu_start).as_secs_f64();
            let pct = used / elapsed * (100.0 / self.ncpu);
            if pct <= self.limit_pct {
                return;
            }
            thread::sleep(Duration::from_millis(5));
            slept += Duration::from_millis(5);
        }
    }
}

/// Periodic RSS check against `--ram-limit`. Absence of an RSS facility
/// silently disables monitoring.
#[derive(Debug)]
pub struct RssWatch {
    limit: Option<u64>,
    calls: AtomicU32,
}

impl RssWatch {
    pub fn new(limit: Option<u64>) -> Self {
        Self { limit, calls: AtomicU32::new(0) }
    }

    pub fn check(&self) -> Result<()> {
        let Some(limit) = self.limit else { return Ok(()) };
        if self.calls.fetch_add(1, Ordering::Relaxed) % THROTTLE_SAMPLE_EVERY != 0 {
            return Ok(());
        }
        match current_rss() {
            Some(rss) if rss > limit => Err(PumpError::RamLimit { rss, limit }),
            _ => Ok(()),
        }
    }
}

/// Counters the backends bump and the progress thread reads.
#[derive(Debug)]
pub struct ProgressCounters {
    pub written: AtomicU64,
    start: Instant,
    target: Option<u64>,
}

impl ProgressCounters {
    pub fn new(target: Option<u64>) -> Self {
        Self { written: AtomicU64::new(0), start: Instant::now(), target }
    }

    pub fn add(&self, n: u64) {
        self.written.fetch_add(n, Ordering::Relaxed);
    }
}

/// Out-of-band progress reporter on its own timer thread. Stops and joins on
/// drop so every exit path releases it.
pub struct ProgressReporter {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn start(counters: Arc<ProgressCounters>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("pump-progress".into())
            .spawn(move || {
                let mut last_written = 0u64;
                let mut last_tick = Instant::now();
                loop {
                    // Sleep in short slices so drop never waits a full interval.
                    let deadline = Instant::now() + interval;
                    while Instant::now() < deadline {
                        if stop_flag.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(Duration::from_millis(25));
                    }
                    let written = counters.written.load(Ordering::Relaxed);
                    let tick = Instant::now();
                    let window = tick.duration_since(last_tick).as_secs_f64().max(1e-6);
                    let rate = (written - last_written) as f64 / window;
                    last_written = written;
                    last_tick = tick;
                    let overall = written as f64
                        / counters.start.elapsed().as_secs_f64().max(1e-6);
                    let mut msg = format!("\rProgress: {}", fmt_bytes(written));
                    if let Some(target) = counters.target {
                        let pct = (written as f64 / target as f64 * 100.0).min(100.0);
                        let remain = target.saturating_sub(written) as f64;
                        let eta = if overall > 0.0 { remain / overall } else { f64::INFINITY };
                        msg.push_str(&format!(
                            " ({pct:.1}%) @ {}/s ETA {}",
                            fmt_bytes(rate as u64),
                            fmt_eta(eta)
                        ));
                    } else {
                        msg.push_str(&format!(" @ {}/s", fmt_bytes(rate as u64)));
                    }
                    eprint!("{msg}");
                }
            })
            .expect("spawn progress thread");
        Self { stop, handle: Some(handle) }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            eprintln!();
        }
    }
}

/// Process CPU time (user + system), where the platform can report it.
#[cfg(unix)]
pub(crate) fn process_cpu_time() -> Option<Duration> {
    let mut ru = std::mem::MaybeUninit::<libc::rusage>::uninit();
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, ru.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let ru = unsafe { ru.assume_init() };
    let secs = (ru.ru_utime.tv_sec + ru.ru_stime.tv_sec).max(0) as u64;
    let micros = (ru.ru_utime.tv_usec + ru.ru_stime.tv_usec).max(0) as u64;
    Some(Duration::from_secs(secs) + Duration::from_micros(micros))
}

#[cfg(not(unix))]
pub(crate) fn process_cpu_time() -> Option<Duration> {
    None
}

/// Current resident set size in bytes.
#[cfg(target_os = "linux")]
pub fn current_rss() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(pages * page_size as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn current_rss() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_propagates() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn rate_bucket_paces_throughput() {
        // 1 MiB/s budget, 512 KiB consumed: at least ~0.4 s must elapse.
        let bucket = RateBucket::new(1024 * 1024);
        let start = Instant::now();
        bucket.acquire(512 * 1024);
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[test]
    fn rate_bucket_never_blocks_under_budget() {
        let bucket = RateBucket::new(u64::MAX / 2);
        let start = Instant::now();
        for _ in 0..64 {
            bucket.acquire(1024);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn generous_cpu_limit_does_not_sleep() {
        if let Some(throttle) = CpuThrottle::new(1000.0, Duration::from_secs(1)) {
            let start = Instant::now();
            for _ in 0..256 {
                throttle.maybe_throttle();
            }
            assert!(start.elapsed() < Duration::from_secs(1));
        }
    }

    #[test]
    fn rss_watch_without_limit_is_free() {
        let watch = RssWatch::new(None);
        for _ in 0..100 {
            watch.check().unwrap();
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn rss_watch_trips_on_tiny_limit() {
        assert!(current_rss().is_some());
        let watch = RssWatch::new(Some(1));
        let err = watch.check().unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn progress_reporter_stops_on_drop() {
        let counters = Arc::new(ProgressCounters::new(Some(1000)));
        let reporter = ProgressReporter::start(Arc::clone(&counters), Duration::from_millis(50));
        counters.add(500);
        thread::sleep(Duration::from_millis(120));
        drop(reporter);
    }
}
