// src/job.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The job controller: one validated configuration driven across one or
//! more targets, strictly sequentially, stopping at the first fatal error.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BufferMode, Compression, Concurrency, EncodingChoice, JobConfig};
use crate::dict::{detect_encoding, read_dict_list, Dictionary, Encoding};
use crate::error::{PumpError, Result};
use crate::guard;
use crate::integrity::hash_file;
use crate::markov::MarkovModel;
use crate::pump::{self, PumpRuntime, PumpTask, StopSet};
use crate::targets::{self, Target};
use crate::throttle::{
    CancelToken, CpuThrottle, ProgressCounters, ProgressReporter, RateBucket, RssWatch,
};
use crate::token::{PumpMode, SourceSpec};
use crate::units::fmt_bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Stream,
    Buffer,
    MultiWriter(usize),
    Pipeline(usize),
}

pub struct JobController {
    cfg: JobConfig,
}

impl JobController {
    /// Validate the configuration and wrap it for execution.
    pub fn new(mut cfg: JobConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &JobConfig {
        &self.cfg
    }

    /// Run the whole job. Targets are processed in order; the first fatal
    /// error cancels the rest and becomes the process exit status.
    pub fn run(&self, cancel: &CancelToken) -> Result<()> {
        let cfg = &self.cfg;
        guard::check_max_times(cfg.times, cfg.max_times)?;
        let spec = self.build_spec()?;
        let targets = targets::resolve(&cfg.path, cfg.filelist.as_deref(), cfg.recursive)?;

        let expected = expected_bytes(cfg, &spec);
        if !cfg.disk_guard {
            tracing::warn!("disk-space guard disabled; writes may fail or fill the disk");
        } else if let Some(expected) = expected {
            guard::check_disk_global(&targets, expected, cfg.disk_guard_margin)?;
        }

        let mut use_ram = cfg.buffer_mode == BufferMode::Ram;
        if use_ram {
            if let Some(expected) = expected {
                if expected > cfg.ram_max {
                    tracing::info!(
                        expected = %fmt_bytes(expected),
                        ram_max = %fmt_bytes(cfg.ram_max),
                        "falling back to streaming: expected output exceeds --ram-max"
                    );
                    use_ram = false;
                }
            }
        }

        for target in &targets {
            tracing::info!(
                target = %target.display(),
                mode = ?cfg.pump_mode,
                append = cfg.append,
                size = ?cfg.size,
                times = ?cfg.times,
                "target start"
            );
            self.run_target(target, &spec, expected, use_ram, cancel)?;
            tracing::info!(target = %target.display(), "target done");
        }
        Ok(())
    }

    fn run_target(
        &self,
        target: &Target,
        spec: &SourceSpec,
        expected: Option<u64>,
        use_ram: bool,
        cancel: &CancelToken,
    ) -> Result<()> {
        let cfg = &self.cfg;
        if let Some(path) = target.path() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(|e| PumpError::io(parent, e))?;
                }
            }
            if cfg.disk_guard {
                if let Some(expected) = expected {
                    guard::check_disk_target(path, expected, cfg.disk_guard_margin)?;
                }
            }
        }

        let stop = self.stop_for(target);
        let progress = Arc::new(ProgressCounters::new(stop.byte_ceiling));
        let _reporter = cfg.progress.then(|| {
            ProgressReporter::start(
                Arc::clone(&progress),
                Duration::from_secs_f64(cfg.progress_interval.max(0.05)),
            )
        });
        let rt = PumpRuntime {
            cancel: cancel.clone(),
            rate: cfg.rate.map(|r| Arc::new(RateBucket::new(r))),
            cpu: cfg
                .cpu_limit
                .and_then(|limit| {
                    CpuThrottle::new(limit, Duration::from_secs_f64(cfg.progress_interval.max(0.05)))
                })
                .map(Arc::new),
            rss: Arc::new(RssWatch::new(cfg.ram_limit)),
            progress: Arc::clone(&progress),
        };
        let task = PumpTask { cfg, target, stop, spec, rt: &rt };

        let outcome = match self.backend_for(target, use_ram) {
            Backend::Buffer => pump::buffer(&task),
            Backend::MultiWriter(w) => pump::multi_writer(&task, w),
            Backend::Pipeline(g) => pump::pipeline(&task, g),
            Backend::Stream => pump::stream(&task),
        }?;

        if let (Some(hash), Some(algo)) = (&outcome.hash, cfg.hash) {
            tracing::info!(
                target = %target.display(),
                algo = algo.name(),
                hash = %hash,
                "running hash"
            );
        }
        if cfg.verify {
            match (target.path(), &outcome.hash, cfg.hash) {
                (Some(path), Some(expected_hex), Some(algo)) => {
                    let actual = hash_file(path, algo)?;
                    if actual != *expected_hex {
                        tracing::error!(target = %target.display(), "hash verification failed");
                        return Err(PumpError::VerifyMismatch { path: path.to_path_buf() });
                    }
                    tracing::info!(target = %target.display(), "hash verification passed");
                }
                // Standard output cannot be re-read; skipped silently.
                _ => tracing::debug!(target = %target.display(), "verification skipped"),
            }
        }
        tracing::debug!(
            written = outcome.written,
            tokens = outcome.tokens,
            "target finished"
        );
        Ok(())
    }

    /// The backend decision table.
    fn backend_for(&self, target: &Target, use_ram: bool) -> Backend {
        let cfg = &self.cfg;
        if use_ram {
            return Backend::Buffer;
        }
        match cfg.concurrency {
            Concurrency::Write if cfg.workers > 1 && cfg.compress == Compression::None => {
                if target.is_stdout() {
                    tracing::info!("standard output cannot take concurrent writers; streaming instead");
                    Backend::Stream
                } else {
                    Backend::MultiWriter(cfg.workers)
                }
            }
            Concurrency::Generate if cfg.gen_workers > 1 => Backend::Pipeline(cfg.gen_workers),
            _ => Backend::Stream,
        }
    }

    /// Per-target stop conditions. Resume counts existing bytes toward the
    /// ceiling so a re-run tops the file up instead of appending a full S.
    fn stop_for(&self, target: &Target) -> StopSet {
        let cfg = &self.cfg;
        let mut ceiling = cfg.byte_ceiling();
        if cfg.resume {
            if let (Some(c), Some(path)) = (ceiling, target.path()) {
                let existing = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                ceiling = Some(c.saturating_sub(existing));
            }
        }
        StopSet { times: cfg.times, byte_ceiling: ceiling }
    }

    /// Materialize dictionaries and the markov model, resolve the encoding,
    /// and freeze the source description shared by all workers.
    fn build_spec(&self) -> Result<SourceSpec> {
        let cfg = &self.cfg;
        let mut dict_paths: Vec<PathBuf> = Vec::new();
        if let Some(p) = &cfg.dict_path {
            dict_paths.push(p.clone());
        }
        if let Some(list) = &cfg.dict_list {
            dict_paths.extend(read_dict_list(list)?);
        }

        let encoding = match cfg.encoding {
            EncodingChoice::Utf8 => Encoding::Utf8,
            EncodingChoice::Latin1 => Encoding::Latin1,
            EncodingChoice::Auto => dict_paths
                .first()
                .map(|p| detect_encoding(p))
                .unwrap_or(Encoding::Utf8),
        };

        let dict = if !dict_paths.is_empty() && cfg.pump_mode == PumpMode::Word {
            Some(Arc::new(Dictionary::load(&dict_paths, encoding, cfg.dict_order)?))
        } else {
            None
        };
        let markov = match (&dict, cfg.markov) {
            (Some(d), Some(n)) => Some(Arc::new(MarkovModel::build(d, n)?)),
            _ => None,
        };

        Ok(SourceSpec {
            mode: cfg.pump_mode,
            word: cfg.word.clone(),
            case: cfg.case,
            dict,
            order: cfg.dict_order,
            markov,
            encoding,
            newline: cfg.newline,
            chunk: cfg.chunk,
            seed: cfg.seed,
        })
    }
}

/// Expected output bytes per target, when knowable up front.
fn expected_bytes(cfg: &JobConfig, spec: &SourceSpec) -> Option<u64> {
    if let Some(ceiling) = cfg.byte_ceiling() {
        return Some(ceiling);
    }
    let times = cfg.times?;
    if let Some(per_token) = spec.fixed_token_len() {
        return Some(per_token.saturating_mul(times));
    }
    match cfg.pump_mode {
        // Dictionary and markov token lengths are data-dependent.
        PumpMode::Word => None,
        _ => Some(times.saturating_mul(cfg.chunk as u64)),
    }
}
