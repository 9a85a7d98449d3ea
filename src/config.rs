// src/config.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Effective job configuration.
//!
//! A `JobConfig` is resolved once per invocation from CLI options layered
//! over an optional JSON/TOML/YAML config file (CLI wins), then validated
//! against the cross-option invariants and consumed by the controller.

use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Deserialize;

use crate::constants::{
    DEFAULT_CHUNK, DEFAULT_DISK_GUARD_MARGIN, DEFAULT_ERROR_BUDGET, DEFAULT_FSYNC_INTERVAL,
    DEFAULT_MAX_TIMES, DEFAULT_RAM_MAX,
};
use crate::dict::DictOrder;
use crate::error::{PumpError, Result};
use crate::integrity::HashAlgo;
use crate::token::{CaseMode, NewlinePolicy, PumpMode};
use crate::units::{parse_count_range, parse_size};

/// Condensed write-mode presets: disposition plus a default pump mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    NormalAppend,
    NormalWrite,
    BinaryAppend,
    BinaryWrite,
}

impl WriteMode {
    pub fn append(&self) -> bool {
        matches!(self, Self::NormalAppend | Self::BinaryAppend)
    }

    pub fn default_pump(&self) -> PumpMode {
        match self {
            Self::NormalAppend | Self::NormalWrite => PumpMode::Word,
            Self::BinaryAppend | Self::BinaryWrite => PumpMode::RandBin,
        }
    }
}

/// Which side of the job is parallelized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Multiple writers share the file handle.
    #[default]
    Write,
    /// Multiple generators feed one writer.
    Generate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// Accumulate in RAM, then dump in one sequential write.
    #[default]
    Ram,
    /// Stream chunks straight to the target.
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

/// Configured text encoding, `Auto` probing the first dictionary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingChoice {
    #[default]
    Auto,
    Utf8,
    Latin1,
}

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub path: PathBuf,
    pub filelist: Option<PathBuf>,
    pub recursive: bool,

    pub append: bool,
    pub pump_mode: PumpMode,
    pub word: Option<String>,
    pub case: CaseMode,
    pub dict_path: Option<PathBuf>,
    pub dict_list: Option<PathBuf>,
    pub dict_order: DictOrder,
    /// N-gram order when the markov generator is enabled.
    pub markov: Option<usize>,
    pub encoding: EncodingChoice,
    pub newline: NewlinePolicy,

    pub times: Option<u64>,
    pub size: Option<u64>,
    pub max_bytes: Option<u64>,

    pub chunk: usize,
    pub concurrency: Concurrency,
    pub workers: usize,
    pub gen_workers: usize,
    pub buffer_mode: BufferMode,
    pub ram_max: u64,

    pub rate: Option<u64>,
    pub cpu_limit: Option<f64>,
    pub ram_limit: Option<u64>,

    /// `Some(interval)` when periodic durability is enabled.
    pub fsync_interval: Option<u64>,
    pub hash: Option<HashAlgo>,
    pub verify: bool,
    pub compress: Compression,
    pub sparse: bool,

    pub resume: bool,
    pub offset: Option<u64>,
    pub truncate_to: Option<u64>,
    pub fallocate_to: Option<u64>,

    pub io_retries: u32,
    pub error_budget: u32,
    pub seed: Option<u64>,

    pub max_times: u64,
    pub disk_guard: bool,
    pub disk_guard_margin: u64,

    pub progress: bool,
    pub progress_interval: f64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("-"),
            filelist: None,
            recursive: false,
            append: true,
            pump_mode: PumpMode::Word,
            word: None,
            case: CaseMode::Fixed,
            dict_path: None,
            dict_list: None,
            dict_order: DictOrder::Random,
            markov: None,
            encoding: EncodingChoice::Auto,
            newline: NewlinePolicy::default(),
            times: None,
            size: None,
            max_bytes: None,
            chunk: DEFAULT_CHUNK,
            concurrency: Concurrency::Write,
            workers: 1,
            gen_workers: 1,
            buffer_mode: BufferMode::Ram,
            ram_max: DEFAULT_RAM_MAX,
            rate: None,
            cpu_limit: None,
            ram_limit: None,
            fsync_interval: None,
            hash: None,
            verify: false,
            compress: Compression::None,
            sparse: false,
            resume: false,
            offset: None,
            truncate_to: None,
            fallocate_to: None,
            io_retries: 0,
            error_budget: DEFAULT_ERROR_BUDGET,
            seed: None,
            max_times: DEFAULT_MAX_TIMES,
            disk_guard: true,
            disk_guard_margin: DEFAULT_DISK_GUARD_MARGIN,
            progress: false,
            progress_interval: 1.0,
        }
    }
}

impl JobConfig {
    /// The effective byte ceiling: `max-bytes` dominates `size`.
    pub fn byte_ceiling(&self) -> Option<u64> {
        match (self.max_bytes, self.size) {
            (Some(m), Some(s)) => Some(m.min(s)),
            (m, s) => m.or(s),
        }
    }

    /// Enforce the cross-option invariants, normalizing where the original
    /// tool normalized and rejecting where it must.
    pub fn validate(&mut self) -> Result<()> {
        if self.times.is_none() && self.byte_ceiling().is_none() {
            return Err(PumpError::Config(
                "provide --times/--times-range or --size/--max-bytes".into(),
            ));
        }
        if self.compress == Compression::Gzip {
            if self.concurrency == Concurrency::Write && self.workers > 1 {
                return Err(PumpError::Config(
                    "--compress gzip is incompatible with multiple writers; drop --workers".into(),
                ));
            }
            if self.concurrency == Concurrency::Generate && self.gen_workers > 1 {
                return Err(PumpError::Config(
                    "--compress gzip is incompatible with generator concurrency; drop --gen-workers".into(),
                ));
            }
            if self.verify {
                return Err(PumpError::Config(
                    "--verify is not offered for compressed output".into(),
                ));
            }
            if self.sparse {
                tracing::warn!("sparse writes cannot seek inside a gzip stream; ignoring --sparse");
                self.sparse = false;
            }
        }
        if self.buffer_mode == BufferMode::Ram
            && (self.workers > 1 || (self.concurrency == Concurrency::Generate && self.gen_workers > 1))
        {
            tracing::warn!("--buffer-mode ram forces single-thread; ignoring extra workers");
            self.workers = 1;
            self.gen_workers = 1;
        }
        if self.verify && self.hash.is_none() {
            return Err(PumpError::Config("--verify requires --hash".into()));
        }
        if self.markov.is_some() && self.dict_path.is_none() && self.dict_list.is_none() {
            return Err(PumpError::Config("--markov requires --dict or --dict-list".into()));
        }
        if let Some(n) = self.markov {
            if n < 2 {
                return Err(PumpError::Config(format!("--ngram must be >= 2, got {n}")));
            }
        }
        if self.pump_mode == PumpMode::Word
            && self.word.is_none()
            && self.dict_path.is_none()
            && self.dict_list.is_none()
        {
            return Err(PumpError::Config(
                "--word is required for pump-mode=word without --dict".into(),
            ));
        }
        if matches!(self.word.as_deref(), Some("")) {
            return Err(PumpError::Config("--word must not be empty".into()));
        }
        if self.chunk == 0 {
            return Err(PumpError::Config("--chunk must be positive".into()));
        }
        if self.offset.is_some() && self.resume {
            tracing::warn!("--offset overrides --resume");
            self.resume = false;
        }
        if self.workers == 0 || self.gen_workers == 0 {
            return Err(PumpError::Config("worker counts must be positive".into()));
        }
        Ok(())
    }
}

/// Resolve the effective repetition count from `--times` / `--times-range`.
/// The range draw honors the configured seed.
pub fn resolve_times(
    times: Option<u64>,
    times_range: Option<&str>,
    seed: Option<u64>,
) -> Result<Option<u64>> {
    match times_range {
        Some(range) => {
            let (lo, hi) = parse_count_range(range)?;
            let n = if lo == hi {
                lo
            } else {
                match seed {
                    Some(s) => Xoshiro256PlusPlus::seed_from_u64(s).random_range(lo..=hi),
                    None => rand::rng().random_range(lo..=hi),
                }
            };
            Ok(Some(n))
        }
        None => Ok(times),
    }
}

/// Raw config-file layer. Top-level keys are long option names with
/// underscores; unknown keys are ignored. Sizes accept numbers or strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub write_mode: Option<String>,
    pub pump_mode: Option<String>,
    pub mode: Option<String>,
    pub word: Option<String>,
    pub dict: Option<PathBuf>,
    pub dict_list: Option<PathBuf>,
    pub dict_order: Option<String>,
    pub markov: Option<bool>,
    pub ngram: Option<usize>,
    pub encoding: Option<String>,
    pub newline_mode: Option<String>,
    pub newline_style: Option<String>,
    pub times: Option<u64>,
    pub times_range: Option<String>,
    pub size: Option<SizeVal>,
    pub max_bytes: Option<SizeVal>,
    pub chunk: Option<SizeVal>,
    pub concurrency: Option<String>,
    pub workers: Option<usize>,
    pub gen_workers: Option<usize>,
    pub buffer_mode: Option<String>,
    pub ram_max: Option<SizeVal>,
    pub rate: Option<SizeVal>,
    pub cpu_limit: Option<f64>,
    pub ram_limit: Option<SizeVal>,
    pub fsync_enable: Option<bool>,
    pub fsync_interval: Option<SizeVal>,
    pub hash: Option<String>,
    pub verify: Option<bool>,
    pub compress: Option<String>,
    pub sparse: Option<bool>,
    pub resume: Option<bool>,
    pub offset: Option<SizeVal>,
    pub truncate: Option<SizeVal>,
    pub fallocate: Option<SizeVal>,
    pub io_retries: Option<u32>,
    pub error_budget: Option<u32>,
    pub seed: Option<u64>,
    pub max_times: Option<u64>,
    pub disable_disk_guard: Option<bool>,
    pub disk_guard_margin: Option<SizeVal>,
    pub filelist: Option<PathBuf>,
    pub recursive: Option<bool>,
    pub progress: Option<bool>,
    pub progress_interval: Option<f64>,
}

/// A size value from a config file: `65536` or `"64KiB"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SizeVal {
    Num(u64),
    Text(String),
}

impl SizeVal {
    pub fn bytes(&self) -> Result<u64> {
        match self {
            SizeVal::Num(n) => Ok(*n),
            SizeVal::Text(s) => parse_size(s),
        }
    }
}

impl FileConfig {
    /// Load by extension: `.json`, `.toml`, `.yaml`/`.yml`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PumpError::io(path, e))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let parsed = match ext.as_str() {
            "json" => serde_json::from_str(&text)
                .map_err(|e| PumpError::Config(format!("bad config {}: {e}", path.display()))),
            "toml" => toml::from_str(&text)
                .map_err(|e| PumpError::Config(format!("bad config {}: {e}", path.display()))),
            "yaml" | "yml" => serde_yaml::from_str(&text)
                .map_err(|e| PumpError::Config(format!("bad config {}: {e}", path.display()))),
            other => Err(PumpError::Config(format!(
                "unsupported config extension .{other} for {}",
                path.display()
            ))),
        }?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> JobConfig {
        JobConfig { times: Some(1), word: Some("x".into()), ..JobConfig::default() }
    }

    #[test]
    fn byte_ceiling_prefers_max_bytes() {
        let mut cfg = base();
        cfg.size = Some(100);
        cfg.max_bytes = Some(60);
        assert_eq!(cfg.byte_ceiling(), Some(60));
        cfg.max_bytes = None;
        assert_eq!(cfg.byte_ceiling(), Some(100));
    }

    #[test]
    fn requires_a_stop_condition() {
        let mut cfg = JobConfig { word: Some("x".into()), ..JobConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn gzip_rejects_multiple_writers() {
        let mut cfg = base();
        cfg.compress = Compression::Gzip;
        cfg.workers = 4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn gzip_rejects_verify_and_drops_sparse() {
        let mut cfg = base();
        cfg.compress = Compression::Gzip;
        cfg.hash = Some(HashAlgo::Sha256);
        cfg.verify = true;
        assert!(cfg.validate().is_err());

        let mut cfg = base();
        cfg.compress = Compression::Gzip;
        cfg.sparse = true;
        cfg.validate().unwrap();
        assert!(!cfg.sparse);
    }

    #[test]
    fn ram_buffer_forces_single_thread() {
        let mut cfg = base();
        cfg.buffer_mode = BufferMode::Ram;
        cfg.workers = 8;
        cfg.validate().unwrap();
        assert_eq!(cfg.workers, 1);
    }

    #[test]
    fn word_mode_needs_a_source() {
        let mut cfg = base();
        cfg.word = None;
        assert!(cfg.validate().is_err());
        cfg.dict_path = Some("words.txt".into());
        cfg.validate().unwrap();
    }

    #[test]
    fn offset_overrides_resume() {
        let mut cfg = base();
        cfg.resume = true;
        cfg.offset = Some(10);
        cfg.validate().unwrap();
        assert!(!cfg.resume);
    }

    #[test]
    fn times_range_draw_is_seeded_and_bounded() {
        for _ in 0..8 {
            let n = resolve_times(None, Some("2^10,2^11"), Some(7)).unwrap().unwrap();
            assert!((1024..=2048).contains(&n));
            assert_eq!(n, resolve_times(None, Some("2^10,2^11"), Some(7)).unwrap().unwrap());
        }
        // Degenerate range needs no randomness at all.
        assert_eq!(resolve_times(None, Some("1e3,1e3"), None).unwrap(), Some(1000));
        assert_eq!(resolve_times(Some(5), None, None).unwrap(), Some(5));
    }

    #[test]
    fn file_config_json_toml_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, content: &str| {
            let p = dir.path().join(name);
            std::fs::write(&p, content).unwrap();
            p
        };

        let json = write("c.json", r#"{"write_mode":"normal-write","word":"Q","times":2,"unknown_key":1}"#);
        let cfg = FileConfig::load(&json).unwrap();
        assert_eq!(cfg.word.as_deref(), Some("Q"));
        assert_eq!(cfg.times, Some(2));

        let toml = write("c.toml", "chunk = \"64KiB\"\nworkers = 4\n");
        let cfg = FileConfig::load(&toml).unwrap();
        assert_eq!(cfg.chunk.unwrap().bytes().unwrap(), 64 * 1024);
        assert_eq!(cfg.workers, Some(4));

        let yaml = write("c.yaml", "rate: 10MiB\nsparse: true\n");
        let cfg = FileConfig::load(&yaml).unwrap();
        assert_eq!(cfg.rate.unwrap().bytes().unwrap(), 10 * 1024 * 1024);
        assert_eq!(cfg.sparse, Some(true));

        assert!(FileConfig::load(&write("c.ini", "x=1")).is_err());
    }

    #[test]
    fn write_mode_presets() {
        assert!(WriteMode::NormalAppend.append());
        assert!(!WriteMode::BinaryWrite.append());
        assert_eq!(WriteMode::NormalWrite.default_pump(), PumpMode::Word);
        assert_eq!(WriteMode::BinaryAppend.default_pump(), PumpMode::RandBin);
    }
}
