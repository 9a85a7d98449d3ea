// src/cli.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line surface and option resolution.
//!
//! Every option is optional at parse time; resolution layers CLI values over
//! a `--config` file (JSON/TOML/YAML) and then over built-in defaults, so a
//! config file can pre-set anything and the command line always wins.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{
    resolve_times, BufferMode, Compression, Concurrency, EncodingChoice, FileConfig, JobConfig,
    SizeVal, WriteMode,
};
use crate::dict::DictOrder;
use crate::error::{PumpError, Result};
use crate::integrity::HashAlgo;
use crate::token::{CaseMode, NewlinePolicy, NewlineScope, NewlineStyle, PumpMode};
use crate::units::parse_size;

fn size_arg(s: &str) -> std::result::Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(
    name = "fpump",
    version,
    about = "File pumper: create or append synthetic data by count or size",
    after_help = "\
Write modes (condensed):
  normal-append  Append text tokens; defaults pump-mode=word.
  normal-write   Truncate then write text tokens; defaults pump-mode=word.
  binary-append  Append binary chunks; defaults pump-mode=randbin.
  binary-write   Truncate then write binary chunks; defaults pump-mode=randbin.

Pump modes:
  word     Encode a word or dictionary tokens (use --mode, newline options).
  bin1     0xFF bytes.
  bin0     0x00 bytes.
  randbin  Cryptographically random bytes.
  randutf8 Printable text.
  randhex  Hex characters of random bytes.
  random   Randomly pick one of the random modes per chunk.

Defaults & safety:
  error-budget=10 (max tolerated write errors); fsync disabled unless --fsync-enable."
)]
pub struct Cli {
    /// Target file path, directory, or `-` for standard output
    pub path: PathBuf,

    /// Repeat token this many times
    #[arg(long)]
    pub times: Option<u64>,
    /// Repeat a random number of times between MIN,MAX (supports 2^20, 1e6)
    #[arg(long, value_name = "MIN,MAX")]
    pub times_range: Option<String>,
    /// Target total size, e.g. 10MiB, 500KB
    #[arg(long, value_parser = size_arg)]
    pub size: Option<u64>,
    /// Hard stop at this size regardless of other limits
    #[arg(long, value_parser = size_arg)]
    pub max_bytes: Option<u64>,

    /// Word/token to write (text mode)
    #[arg(long)]
    pub word: Option<String>,
    /// Path to a wordlist (newline-separated)
    #[arg(long = "dict")]
    pub dict: Option<PathBuf>,
    /// File listing dictionary files, one per line (relative to the list)
    #[arg(long)]
    pub dict_list: Option<PathBuf>,
    /// Dictionary iteration order
    #[arg(long, value_parser = ["sequential", "reverse", "random", "presorted"])]
    pub dict_order: Option<String>,
    /// Generate tokens from a word-level N-gram model over the dictionary
    #[arg(long)]
    pub markov: bool,
    /// N for the N-gram model when --markov is set
    #[arg(long)]
    pub ngram: Option<usize>,
    /// Text encoding for dictionaries and token output
    #[arg(long, value_parser = ["auto", "utf-8", "latin-1"])]
    pub encoding: Option<String>,

    /// Condensed write-mode selector
    #[arg(long, value_parser = ["normal-append", "normal-write", "binary-append", "binary-write"])]
    pub write_mode: Option<String>,
    /// Which generator produces bytes
    #[arg(long, value_parser = ["word", "bin1", "bin0", "randbin", "randutf8", "randhex", "random"])]
    pub pump_mode: Option<String>,
    /// Fixed token, or randomly re-cased per write
    #[arg(long, value_parser = ["fixed", "random"])]
    pub mode: Option<String>,

    /// Number of writer threads (write concurrency)
    #[arg(long)]
    pub workers: Option<usize>,
    /// Chunk size for generation and writes
    #[arg(long, value_parser = size_arg)]
    pub chunk: Option<u64>,
    /// Random seed for reproducibility
    #[arg(long)]
    pub seed: Option<u64>,
    /// Throttle throughput to RATE bytes/sec (e.g. 10MiB)
    #[arg(long, value_parser = size_arg)]
    pub rate: Option<u64>,
    /// Approximate CPU limit in percent
    #[arg(long)]
    pub cpu_limit: Option<f64>,
    /// Parallelize writers or generators
    #[arg(long, value_parser = ["write", "generate"])]
    pub concurrency: Option<String>,
    /// Number of generator threads when --concurrency generate
    #[arg(long)]
    pub gen_workers: Option<usize>,
    /// Run a local benchmark to suggest chunk/workers/concurrency
    #[arg(long)]
    pub benchmark: bool,
    /// Bytes to write per benchmark scenario
    #[arg(long, value_parser = size_arg)]
    pub bench_size: Option<u64>,
    /// Compress output; incompatible with concurrent writers
    #[arg(long, value_parser = ["none", "gzip"])]
    pub compress: Option<String>,

    /// Write via RAM then dump, or stream directly
    #[arg(long, value_parser = ["ram", "stream"])]
    pub buffer_mode: Option<String>,
    /// Max RAM to use before falling back to streaming
    #[arg(long, value_parser = size_arg)]
    pub ram_max: Option<u64>,
    /// Skip all-zero chunks to create sparse files where supported
    #[arg(long)]
    pub sparse: bool,

    /// Upper guard for --times
    #[arg(long)]
    pub max_times: Option<u64>,
    /// Disable the free-disk-space guardrail (may fill the disk)
    #[arg(long)]
    pub disable_disk_guard: bool,
    /// Extra free space to require beyond the expected output
    #[arg(long, value_parser = size_arg)]
    pub disk_guard_margin: Option<u64>,
    /// Abort if process RSS exceeds this size
    #[arg(long, value_parser = size_arg)]
    pub ram_limit: Option<u64>,
    /// Enable periodic fsync at --fsync-interval
    #[arg(long)]
    pub fsync_enable: bool,
    /// Flush+fsync every SIZE bytes when enabled
    #[arg(long, value_parser = size_arg)]
    pub fsync_interval: Option<u64>,
    /// Compute a running hash while writing
    #[arg(long, value_parser = ["md5", "sha1", "sha256", "sha512"])]
    pub hash: Option<String>,
    /// Re-read and verify the hash after writing (uncompressed files only)
    #[arg(long)]
    pub verify: bool,
    /// Retries per chunk on transient I/O errors
    #[arg(long)]
    pub io_retries: Option<u32>,
    /// Max tolerated write errors before abort
    #[arg(long)]
    pub error_budget: Option<u32>,
    /// Resume size-bound writes by continuing at end of file
    #[arg(long)]
    pub resume: bool,
    /// Start writing at this byte offset (overrides resume)
    #[arg(long, value_parser = size_arg)]
    pub offset: Option<u64>,
    /// Truncate the target to this size before writing
    #[arg(long, value_parser = size_arg)]
    pub truncate: Option<u64>,
    /// Preallocate file space to this size when supported
    #[arg(long, value_parser = size_arg)]
    pub fallocate: Option<u64>,

    /// File listing targets to pump, one per line
    #[arg(long)]
    pub filelist: Option<PathBuf>,
    /// Recurse into subdirectories when the target is a directory
    #[arg(long)]
    pub recursive: bool,

    /// Show progress on standard error
    #[arg(long)]
    pub progress: bool,
    /// Progress update interval in seconds
    #[arg(long)]
    pub progress_interval: Option<f64>,
    /// Insert a newline after each word token or each character
    #[arg(long, value_parser = ["none", "word", "char"])]
    pub newline_mode: Option<String>,
    /// Newline style when inserting newlines
    #[arg(long, value_parser = ["lf", "cr", "crlf"])]
    pub newline_style: Option<String>,

    /// TOML/JSON/YAML file with option defaults
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Logging level
    #[arg(long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,
    /// Log file (appended); defaults to standard error
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn opt_size(cli: Option<u64>, file: Option<&SizeVal>) -> Result<Option<u64>> {
    match cli {
        Some(v) => Ok(Some(v)),
        None => file.map(|v| v.bytes()).transpose(),
    }
}

impl Cli {
    /// Layer this invocation over its config file and produce the effective
    /// job configuration. Validation happens in the controller.
    pub fn into_job_config(self) -> Result<JobConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let write_mode = parse_write_mode(
            self.write_mode
                .as_deref()
                .or(file.write_mode.as_deref())
                .unwrap_or("normal-append"),
        )?;
        let pump_mode = match self.pump_mode.as_deref().or(file.pump_mode.as_deref()) {
            Some(s) => parse_pump_mode(s)?,
            None => write_mode.default_pump(),
        };

        let seed = self.seed.or(file.seed);
        let times = resolve_times(
            self.times.or(file.times),
            self.times_range.as_deref().or(file.times_range.as_deref()),
            seed,
        )?;

        let fsync_enabled = self.fsync_enable || file.fsync_enable.unwrap_or(false);
        let fsync_interval = opt_size(self.fsync_interval, file.fsync_interval.as_ref())?
            .unwrap_or(crate::constants::DEFAULT_FSYNC_INTERVAL);

        let markov_enabled = self.markov || file.markov.unwrap_or(false);
        let ngram = self.ngram.or(file.ngram).unwrap_or(2);

        let cfg = JobConfig {
            path: self.path,
            filelist: self.filelist.or(file.filelist),
            recursive: self.recursive || file.recursive.unwrap_or(false),

            append: write_mode.append(),
            pump_mode,
            word: self.word.or(file.word),
            case: parse_case(self.mode.as_deref().or(file.mode.as_deref()).unwrap_or("fixed"))?,
            dict_path: self.dict.or(file.dict),
            dict_list: self.dict_list.or(file.dict_list),
            dict_order: parse_dict_order(
                self.dict_order
                    .as_deref()
                    .or(file.dict_order.as_deref())
                    .unwrap_or("random"),
            )?,
            markov: markov_enabled.then_some(ngram),
            encoding: parse_encoding(
                self.encoding.as_deref().or(file.encoding.as_deref()).unwrap_or("auto"),
            )?,
            newline: NewlinePolicy {
                scope: parse_newline_scope(
                    self.newline_mode
                        .as_deref()
                        .or(file.newline_mode.as_deref())
                        .unwrap_or("none"),
                )?,
                style: parse_newline_style(
                    self.newline_style
                        .as_deref()
                        .or(file.newline_style.as_deref())
                        .unwrap_or("lf"),
                )?,
            },

            times,
            size: opt_size(self.size, file.size.as_ref())?,
            max_bytes: opt_size(self.max_bytes, file.max_bytes.as_ref())?,

            chunk: opt_size(self.chunk, file.chunk.as_ref())?
                .unwrap_or(crate::constants::DEFAULT_CHUNK as u64) as usize,
            concurrency: parse_concurrency(
                self.concurrency
                    .as_deref()
                    .or(file.concurrency.as_deref())
                    .unwrap_or("write"),
            )?,
            workers: self.workers.or(file.workers).unwrap_or(1),
            gen_workers: self.gen_workers.or(file.gen_workers).unwrap_or(1),
            buffer_mode: parse_buffer_mode(
                self.buffer_mode
                    .as_deref()
                    .or(file.buffer_mode.as_deref())
                    .unwrap_or("ram"),
            )?,
            ram_max: opt_size(self.ram_max, file.ram_max.as_ref())?
                .unwrap_or(crate::constants::DEFAULT_RAM_MAX),

            rate: opt_size(self.rate, file.rate.as_ref())?,
            cpu_limit: self.cpu_limit.or(file.cpu_limit),
            ram_limit: opt_size(self.ram_limit, file.ram_limit.as_ref())?,

            fsync_interval: fsync_enabled.then_some(fsync_interval),
            hash: self
                .hash
                .as_deref()
                .or(file.hash.as_deref())
                .map(HashAlgo::parse)
                .transpose()?,
            verify: self.verify || file.verify.unwrap_or(false),
            compress: parse_compress(
                self.compress.as_deref().or(file.compress.as_deref()).unwrap_or("none"),
            )?,
            sparse: self.sparse || file.sparse.unwrap_or(false),

            resume: self.resume || file.resume.unwrap_or(false),
            offset: opt_size(self.offset, file.offset.as_ref())?,
            truncate_to: opt_size(self.truncate, file.truncate.as_ref())?,
            fallocate_to: opt_size(self.fallocate, file.fallocate.as_ref())?,

            io_retries: self.io_retries.or(file.io_retries).unwrap_or(0),
            error_budget: self
                .error_budget
                .or(file.error_budget)
                .unwrap_or(crate::constants::DEFAULT_ERROR_BUDGET),
            seed,

            max_times: self
                .max_times
                .or(file.max_times)
                .unwrap_or(crate::constants::DEFAULT_MAX_TIMES),
            disk_guard: !(self.disable_disk_guard || file.disable_disk_guard.unwrap_or(false)),
            disk_guard_margin: opt_size(self.disk_guard_margin, file.disk_guard_margin.as_ref())?
                .unwrap_or(crate::constants::DEFAULT_DISK_GUARD_MARGIN),

            progress: self.progress || file.progress.unwrap_or(false),
            progress_interval: self.progress_interval.or(file.progress_interval).unwrap_or(1.0),
        };
        Ok(cfg)
    }
}

fn parse_write_mode(s: &str) -> Result<WriteMode> {
    match s {
        "normal-append" => Ok(WriteMode::NormalAppend),
        "normal-write" => Ok(WriteMode::NormalWrite),
        "binary-append" => Ok(WriteMode::BinaryAppend),
        "binary-write" => Ok(WriteMode::BinaryWrite),
        other => Err(PumpError::Config(format!("unknown write mode: {other}"))),
    }
}

fn parse_pump_mode(s: &str) -> Result<PumpMode> {
    match s {
        "word" => Ok(PumpMode::Word),
        "bin1" => Ok(PumpMode::Bin1),
        "bin0" => Ok(PumpMode::Bin0),
        "randbin" => Ok(PumpMode::RandBin),
        "randutf8" => Ok(PumpMode::RandUtf8),
        "randhex" => Ok(PumpMode::RandHex),
        "random" => Ok(PumpMode::Random),
        other => Err(PumpError::Config(format!("unknown pump mode: {other}"))),
    }
}

fn parse_dict_order(s: &str) -> Result<DictOrder> {
    match s {
        "sequential" => Ok(DictOrder::Sequential),
        "reverse" => Ok(DictOrder::Reverse),
        "presorted" => Ok(DictOrder::Presorted),
        "random" => Ok(DictOrder::Random),
        other => Err(PumpError::Config(format!("unknown dictionary order: {other}"))),
    }
}

fn parse_case(s: &str) -> Result<CaseMode> {
    match s {
        "fixed" => Ok(CaseMode::Fixed),
        "random" => Ok(CaseMode::Random),
        other => Err(PumpError::Config(format!("unknown token mode: {other}"))),
    }
}

fn parse_encoding(s: &str) -> Result<EncodingChoice> {
    match s {
        "auto" => Ok(EncodingChoice::Auto),
        "utf-8" | "utf8" => Ok(EncodingChoice::Utf8),
        "latin-1" | "latin1" => Ok(EncodingChoice::Latin1),
        other => Err(PumpError::Config(format!("unknown encoding: {other}"))),
    }
}

fn parse_newline_scope(s: &str) -> Result<NewlineScope> {
    match s {
        "none" => Ok(NewlineScope::None),
        "word" => Ok(NewlineScope::Word),
        "char" => Ok(NewlineScope::Char),
        other => Err(PumpError::Config(format!("unknown newline mode: {other}"))),
    }
}

fn parse_newline_style(s: &str) -> Result<NewlineStyle> {
    match s {
        "lf" => Ok(NewlineStyle::Lf),
        "cr" => Ok(NewlineStyle::Cr),
        "crlf" => Ok(NewlineStyle::Crlf),
        other => Err(PumpError::Config(format!("unknown newline style: {other}"))),
    }
}

fn parse_concurrency(s: &str) -> Result<Concurrency> {
    match s {
        "write" => Ok(Concurrency::Write),
        "generate" => Ok(Concurrency::Generate),
        other => Err(PumpError::Config(format!("unknown concurrency model: {other}"))),
    }
}

fn parse_buffer_mode(s: &str) -> Result<BufferMode> {
    match s {
        "ram" => Ok(BufferMode::Ram),
        "stream" => Ok(BufferMode::Stream),
        other => Err(PumpError::Config(format!("unknown buffer mode: {other}"))),
    }
}

fn parse_compress(s: &str) -> Result<Compression> {
    match s {
        "none" => Ok(Compression::None),
        "gzip" => Ok(Compression::Gzip),
        other => Err(PumpError::Config(format!("unknown compression: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fpump").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_mirror_the_original_tool() {
        let cfg = parse(&["out.txt", "--word", "x", "--times", "1"])
            .into_job_config()
            .unwrap();
        assert!(cfg.append);
        assert_eq!(cfg.pump_mode, PumpMode::Word);
        assert_eq!(cfg.chunk, 64 * 1024);
        assert_eq!(cfg.buffer_mode, BufferMode::Ram);
        assert_eq!(cfg.error_budget, 10);
        assert!(cfg.disk_guard);
        assert!(cfg.fsync_interval.is_none());
        assert_eq!(cfg.dict_order, DictOrder::Random);
    }

    #[test]
    fn condensed_write_modes_set_disposition_and_pump() {
        let cfg = parse(&["o", "--write-mode", "binary-write", "--size", "1KiB"])
            .into_job_config()
            .unwrap();
        assert!(!cfg.append);
        assert_eq!(cfg.pump_mode, PumpMode::RandBin);

        let cfg = parse(&["o", "--write-mode", "binary-append", "--size", "1KiB"])
            .into_job_config()
            .unwrap();
        assert!(cfg.append);

        // An explicit pump mode beats the preset.
        let cfg = parse(&[
            "o", "--write-mode", "binary-write", "--pump-mode", "bin0", "--size", "1KiB",
        ])
        .into_job_config()
        .unwrap();
        assert_eq!(cfg.pump_mode, PumpMode::Bin0);
    }

    #[test]
    fn sizes_parse_human_units() {
        let cfg = parse(&[
            "o", "--size", "10MiB", "--chunk", "64KiB", "--rate", "1MB", "--word", "x",
        ])
        .into_job_config()
        .unwrap();
        assert_eq!(cfg.size, Some(10 * 1024 * 1024));
        assert_eq!(cfg.chunk, 64 * 1024);
        assert_eq!(cfg.rate, Some(1_000_000));
    }

    #[test]
    fn fsync_interval_needs_the_enable_flag() {
        let cfg = parse(&["o", "--word", "x", "--times", "1", "--fsync-interval", "1MiB"])
            .into_job_config()
            .unwrap();
        assert!(cfg.fsync_interval.is_none());

        let cfg = parse(&[
            "o", "--word", "x", "--times", "1", "--fsync-enable", "--fsync-interval", "1MiB",
        ])
        .into_job_config()
        .unwrap();
        assert_eq!(cfg.fsync_interval, Some(1024 * 1024));
    }

    #[test]
    fn config_file_fills_gaps_and_cli_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(
            &path,
            r#"{"write_mode": "normal-write", "word": "Q", "times": 2, "chunk": "1KiB"}"#,
        )
        .unwrap();

        let cfg = parse(&["out.txt", "--config", path.to_str().unwrap()])
            .into_job_config()
            .unwrap();
        assert!(!cfg.append);
        assert_eq!(cfg.word.as_deref(), Some("Q"));
        assert_eq!(cfg.times, Some(2));
        assert_eq!(cfg.chunk, 1024);

        let cfg = parse(&[
            "out.txt", "--config", path.to_str().unwrap(), "--word", "R", "--times", "7",
        ])
        .into_job_config()
        .unwrap();
        assert_eq!(cfg.word.as_deref(), Some("R"));
        assert_eq!(cfg.times, Some(7));
    }

    #[test]
    fn times_range_resolves_at_parse_time() {
        let cfg = parse(&["o", "--word", "x", "--times-range", "2^4,2^5", "--seed", "3"])
            .into_job_config()
            .unwrap();
        let n = cfg.times.unwrap();
        assert!((16..=32).contains(&n));
    }

    #[test]
    fn markov_flag_carries_ngram_order() {
        let cfg = parse(&[
            "o", "--dict", "w.txt", "--markov", "--ngram", "3", "--times", "4",
        ])
        .into_job_config()
        .unwrap();
        assert_eq!(cfg.markov, Some(3));

        let cfg = parse(&["o", "--dict", "w.txt", "--times", "4"]).into_job_config().unwrap();
        assert_eq!(cfg.markov, None);
    }
}
