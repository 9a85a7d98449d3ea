// src/bench.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local benchmark: explore throughput against chunk size, worker count,
//! and concurrency model, then recommend a flag combination.
//!
//! Writes temporary randbin data under a scratch directory and deletes it.
//! Best result is the highest throughput, tie-broken by lower CPU use and
//! then lower RSS growth.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::{BufferMode, Concurrency, JobConfig};
use crate::dict::{DictOrder, Encoding};
use crate::pump::{self, PumpRuntime, PumpTask, StopSet};
use crate::targets::Target;
use crate::throttle::{current_rss, process_cpu_time, ProgressCounters};
use crate::token::{CaseMode, NewlinePolicy, PumpMode, SourceSpec};

#[derive(Debug, Clone, Copy)]
pub struct BenchResult {
    pub chunk: usize,
    pub workers: usize,
    pub concurrency: Concurrency,
    pub throughput_bps: f64,
    pub cpu_percent: f64,
    pub rss_bytes: Option<u64>,
}

impl BenchResult {
    /// Flag string reproducing this scenario.
    pub fn recommendation(&self) -> String {
        let workers_flag = match self.concurrency {
            Concurrency::Write => format!("--workers {}", self.workers),
            Concurrency::Generate => format!("--gen-workers {}", self.workers),
        };
        let model = match self.concurrency {
            Concurrency::Write => "write",
            Concurrency::Generate => "generate",
        };
        format!("--chunk {} --concurrency {model} {workers_flag}", self.chunk)
    }
}

/// Run the benchmark suite and return all results plus the best.
pub fn run_benchmark(bench_size: u64) -> Result<(Vec<BenchResult>, BenchResult)> {
    let candidate_chunks = [32 * 1024, 64 * 1024, 256 * 1024, 1024 * 1024];
    let ncpu = num_cpus::get().max(1);
    let candidate_workers: Vec<usize> =
        [1usize, 2, 4, 8].into_iter().filter(|&w| w <= ncpu).collect();

    let dir = tempfile::tempdir().context("create benchmark scratch directory")?;
    let mut results = Vec::new();

    for &chunk in &candidate_chunks {
        for &workers in &candidate_workers {
            for concurrency in [Concurrency::Write, Concurrency::Generate] {
                let path = dir.path().join(format!(
                    "bench-{}-{workers}-{chunk}.bin",
                    match concurrency {
                        Concurrency::Write => "write",
                        Concurrency::Generate => "generate",
                    }
                ));
                let cfg = JobConfig {
                    path: path.clone(),
                    append: false,
                    buffer_mode: BufferMode::Stream,
                    chunk,
                    disk_guard: false,
                    ..JobConfig::default()
                };
                let spec = SourceSpec {
                    mode: PumpMode::RandBin,
                    word: None,
                    case: CaseMode::Fixed,
                    dict: None,
                    order: DictOrder::Sequential,
                    markov: None,
                    encoding: Encoding::Utf8,
                    newline: NewlinePolicy::default(),
                    chunk,
                    seed: None,
                };
                let target = Target::File(path.clone());
                let rt = PumpRuntime::unthrottled(Arc::new(ProgressCounters::new(Some(bench_size))));
                let task = PumpTask {
                    cfg: &cfg,
                    target: &target,
                    stop: StopSet { times: None, byte_ceiling: Some(bench_size) },
                    spec: &spec,
                    rt: &rt,
                };

                let rss_before = current_rss();
                let cpu_before = process_cpu_time();
                let wall = Instant::now();
                match concurrency {
                    Concurrency::Write if workers > 1 => pump::multi_writer(&task, workers),
                    Concurrency::Write => pump::stream(&task),
                    Concurrency::Generate => pump::pipeline(&task, workers),
                }
                .with_context(|| format!("benchmark scenario failed: {}", path.display()))?;
                let elapsed = wall.elapsed().as_secs_f64().max(1e-6);
                let cpu_after = process_cpu_time();
                let rss_after = current_rss();

                let cpu_percent = match (cpu_before, cpu_after) {
                    (Some(a), Some(b)) => {
                        let used = b.saturating_sub(a).as_secs_f64();
                        (used / elapsed * 100.0 / ncpu as f64).clamp(0.0, 100.0)
                    }
                    _ => 0.0,
                };
                let rss_bytes = match (rss_before, rss_after) {
                    (Some(a), Some(b)) => Some(b.saturating_sub(a)),
                    _ => None,
                };

                results.push(BenchResult {
                    chunk,
                    workers,
                    concurrency,
                    throughput_bps: bench_size as f64 / elapsed,
                    cpu_percent,
                    rss_bytes,
                });
                let _ = std::fs::remove_file(&path);
            }
        }
    }

    let best = *results
        .iter()
        .max_by(|a, b| {
            (a.throughput_bps, -a.cpu_percent, -(a.rss_bytes.unwrap_or(0) as f64))
                .partial_cmp(&(b.throughput_bps, -b.cpu_percent, -(b.rss_bytes.unwrap_or(0) as f64)))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .context("benchmark produced no results")?;

    tracing::info!(
        chunk = best.chunk,
        workers = best.workers,
        concurrency = ?best.concurrency,
        throughput_mibs = best.throughput_bps / (1024.0 * 1024.0),
        cpu_pct = best.cpu_percent,
        "benchmark best"
    );
    Ok((results, best))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_benchmark_recommends_something() {
        let (results, best) = run_benchmark(64 * 1024).unwrap();
        assert!(!results.is_empty());
        assert!(best.throughput_bps > 0.0);
        assert!(best.recommendation().contains("--chunk"));
    }
}
