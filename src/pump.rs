// src/pump.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Writing strategies.
//!
//! Four backends produce the same external effect: stream one chunk at a
//! time, buffer everything in RAM and dump once, run W writers against one
//! shared handle, or fan generators into a single writer over a bounded
//! queue. They all honor the same stop conditions (max-bytes, then size,
//! then times, then cancellation) and share one `ChunkWriter` that owns the
//! sink, sparse skipping, retries, the running hash, and fsync scheduling.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use digest::DynDigest;
use flate2::write::GzEncoder;
use parking_lot::Mutex;

use crate::config::{Compression, JobConfig};
use crate::constants::{
    PIPELINE_QUEUE_FACTOR, RETRY_BACKOFF_BASE_MS, RETRY_BACKOFF_CAP_MS,
};
use crate::error::{PumpError, Result};
use crate::integrity::hex;
use crate::targets::Target;
use crate::throttle::{CancelToken, CpuThrottle, ProgressCounters, RateBucket, RssWatch};
use crate::token::SourceSpec;

/// Stop conditions shared by every backend. `byte_ceiling` is the effective
/// minimum of max-bytes and size, already adjusted for resume.
#[derive(Debug, Clone, Copy)]
pub struct StopSet {
    pub times: Option<u64>,
    pub byte_ceiling: Option<u64>,
}

impl StopSet {
    fn done(&self, written: u64, tokens: u64) -> bool {
        if let Some(ceiling) = self.byte_ceiling {
            if written >= ceiling {
                return true;
            }
        }
        if let Some(times) = self.times {
            if tokens >= times {
                return true;
            }
        }
        false
    }

    fn remaining(&self, written: u64) -> usize {
        match self.byte_ceiling {
            Some(ceiling) => ceiling.saturating_sub(written).min(usize::MAX as u64) as usize,
            None => usize::MAX,
        }
    }
}

/// Shared throttles and counters for one target.
pub struct PumpRuntime {
    pub cancel: CancelToken,
    pub rate: Option<Arc<RateBucket>>,
    pub cpu: Option<Arc<CpuThrottle>>,
    pub rss: Arc<RssWatch>,
    pub progress: Arc<ProgressCounters>,
}

impl PumpRuntime {
    /// Plain runtime with no throttles, used by tests and the benchmark.
    pub fn unthrottled(progress: Arc<ProgressCounters>) -> Self {
        Self {
            cancel: CancelToken::new(),
            rate: None,
            cpu: None,
            rss: Arc::new(RssWatch::new(None)),
            progress,
        }
    }

    fn throttle(&self, len: u64) {
        if let Some(bucket) = &self.rate {
            bucket.acquire(len);
        }
        if let Some(cpu) = &self.cpu {
            cpu.maybe_throttle();
        }
    }
}

/// What one backend run produced.
#[derive(Debug)]
pub struct PumpOutcome {
    pub written: u64,
    pub tokens: u64,
    pub hash: Option<String>,
}

enum Sink {
    File(File),
    Gzip(GzEncoder<File>),
    Stdout(io::Stdout),
}

impl Sink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Sink::File(f) => f.write_all(buf),
            Sink::Gzip(g) => g.write_all(buf),
            Sink::Stdout(s) => s.write_all(buf),
        }
    }

    /// Advance past an all-zero chunk, leaving a hole. File sinks only.
    fn skip(&mut self, len: u64) -> io::Result<()> {
        match self {
            Sink::File(f) => f.seek(SeekFrom::Current(len as i64)).map(|_| ()),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "sparse skip on a non-seekable sink",
            )),
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        match self {
            Sink::File(f) => f.sync_data(),
            Sink::Gzip(g) => {
                g.flush()?;
                g.get_ref().sync_data()
            }
            Sink::Stdout(s) => s.flush(),
        }
    }
}

/// One open target plus everything a chunk write touches. Under multi-writer
/// this whole struct sits behind the shared mutex, so seek + write + hash +
/// counter updates form one critical section.
pub struct ChunkWriter {
    sink: Sink,
    path: PathBuf,
    sparse: bool,
    fsync_interval: Option<u64>,
    hasher: Option<Box<dyn DynDigest + Send>>,
    io_retries: u32,
    error_budget: i64,
    written: u64,
    tokens: u64,
    synced: u64,
    base_offset: u64,
    progress: Arc<ProgressCounters>,
}

impl ChunkWriter {
    /// Open the target with the configured disposition and pre-sizing, and
    /// position the stream (offset, or EOF on resume).
    pub fn open(
        cfg: &JobConfig,
        target: &Target,
        progress: Arc<ProgressCounters>,
    ) -> Result<Self> {
        let (sink, path, base_offset, sparse) = match target {
            Target::Stdout => (Sink::Stdout(io::stdout()), PathBuf::from("-"), 0, false),
            Target::File(path) => {
                let mut opts = OpenOptions::new();
                opts.create(true);
                if cfg.append {
                    opts.append(true);
                } else {
                    opts.write(true);
                    // Resume continues the existing file; never truncate it away.
                    if !cfg.resume {
                        opts.truncate(true);
                    }
                }
                let mut file = opts.open(path).map_err(|e| PumpError::io(path, e))?;

                if let Some(len) = cfg.truncate_to {
                    file.set_len(len).map_err(|e| PumpError::io(path, e))?;
                }
                if let Some(len) = cfg.fallocate_to {
                    preallocate(&file, len).map_err(|e| PumpError::io(path, e))?;
                }

                let base = if cfg.append {
                    file.metadata().map_err(|e| PumpError::io(path, e))?.len()
                } else if let Some(offset) = cfg.offset {
                    file.seek(SeekFrom::Start(offset)).map_err(|e| PumpError::io(path, e))?
                } else if cfg.resume {
                    file.seek(SeekFrom::End(0)).map_err(|e| PumpError::io(path, e))?
                } else {
                    0
                };

                let mut sparse = cfg.sparse;
                if sparse && cfg.append {
                    tracing::warn!(
                        "sparse skipping needs a seekable disposition; ignoring --sparse under append"
                    );
                    sparse = false;
                }

                let sink = match cfg.compress {
                    Compression::Gzip => {
                        Sink::Gzip(GzEncoder::new(file, flate2::Compression::default()))
                    }
                    Compression::None => Sink::File(file),
                };
                (sink, path.clone(), base, sparse)
            }
        };

        Ok(Self {
            sink,
            path,
            sparse,
            fsync_interval: cfg.fsync_interval,
            hasher: cfg.hash.map(|h| h.hasher()),
            io_retries: cfg.io_retries,
            error_budget: i64::from(cfg.error_budget),
            written: 0,
            tokens: 0,
            synced: 0,
            base_offset,
            progress,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Write (or sparse-skip) one chunk, with retries against the error
    /// budget, then update hash, counters, and fsync scheduling.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let skip = self.sparse && chunk.iter().all(|&b| b == 0);
        self.retried(|sink| {
            if skip {
                sink.skip(chunk.len() as u64)
            } else {
                sink.write_all(chunk)
            }
        })?;
        if let Some(hasher) = &mut self.hasher {
            // Skipped chunks are still logical zeros in the file.
            hasher.update(chunk);
        }
        self.written += chunk.len() as u64;
        self.tokens += 1;
        self.progress.add(chunk.len() as u64);
        if let Some(interval) = self.fsync_interval {
            self.synced += chunk.len() as u64;
            if self.synced >= interval {
                let path = self.path.clone();
                self.sink.sync().map_err(|e| PumpError::io(path, e))?;
                self.synced = 0;
            }
        }
        Ok(())
    }

    /// Single sequential write of a prebuilt buffer (RAM dump). Counters and
    /// hashing were handled during the fill.
    pub fn dump(&mut self, buf: &[u8]) -> Result<()> {
        self.retried(|sink| sink.write_all(buf))?;
        self.written += buf.len() as u64;
        Ok(())
    }

    fn retried(&mut self, mut op: impl FnMut(&mut Sink) -> io::Result<()>) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match op(&mut self.sink) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.error_budget -= 1;
                    if attempt < self.io_retries && self.error_budget >= 0 {
                        let delay = (RETRY_BACKOFF_BASE_MS << attempt.min(16)).min(RETRY_BACKOFF_CAP_MS);
                        tracing::warn!(
                            path = %self.path.display(),
                            attempt,
                            budget = self.error_budget,
                            error = %e,
                            "transient write failure, retrying"
                        );
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                    } else {
                        return Err(PumpError::io(&self.path, e));
                    }
                }
            }
        }
    }

    /// Close out the target: extend a trailing hole, finish compression,
    /// final fsync when durability is on, and yield the running hash.
    pub fn finish(self) -> Result<PumpOutcome> {
        let ChunkWriter {
            sink, path, sparse, fsync_interval, hasher, written, tokens, base_offset, ..
        } = self;
        if sparse {
            if let Sink::File(file) = &sink {
                let end = base_offset + written;
                let on_disk = file.metadata().map_err(|e| PumpError::io(&path, e))?.len();
                if on_disk < end {
                    file.set_len(end).map_err(|e| PumpError::io(&path, e))?;
                }
            }
        }
        let mut sink = match sink {
            Sink::Gzip(encoder) => {
                Sink::File(encoder.finish().map_err(|e| PumpError::io(&path, e))?)
            }
            other => other,
        };
        if fsync_interval.is_some() {
            sink.sync().map_err(|e| PumpError::io(&path, e))?;
        }
        let hash = hasher.map(|mut h| hex(&h.finalize_reset()));
        Ok(PumpOutcome { written, tokens, hash })
    }
}

#[cfg(unix)]
fn preallocate(file: &File, len: u64) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, len as libc::off_t) };
    if rc == 0 {
        Ok(())
    } else {
        // Some filesystems refuse fallocate; a plain extension is equivalent
        // for our purposes.
        file.set_len(len)
    }
}

#[cfg(not(unix))]
fn preallocate(file: &File, len: u64) -> io::Result<()> {
    file.set_len(len)
}

/// Inputs common to every backend run.
pub struct PumpTask<'a> {
    pub cfg: &'a JobConfig,
    pub target: &'a Target,
    pub stop: StopSet,
    pub spec: &'a SourceSpec,
    pub rt: &'a PumpRuntime,
}

/// Single streaming writer: pull, throttle, write, repeat.
pub fn stream(task: &PumpTask<'_>) -> Result<PumpOutcome> {
    let mut source = task.spec.build()?;
    let mut writer = ChunkWriter::open(task.cfg, task.target, Arc::clone(&task.rt.progress))?;
    loop {
        if task.rt.cancel.is_cancelled() {
            writer.finish()?;
            return Err(PumpError::Cancelled);
        }
        if task.stop.done(writer.written, writer.tokens) {
            break;
        }
        let chunk = source.next_chunk(task.stop.remaining(writer.written));
        task.rt.throttle(chunk.len() as u64);
        writer.write_chunk(&chunk)?;
        task.rt.rss.check()?;
    }
    writer.finish()
}

/// Fill one contiguous RAM buffer, then dump it in a single write.
pub fn buffer(task: &PumpTask<'_>) -> Result<PumpOutcome> {
    let cfg = task.cfg;
    let mut source = task.spec.build()?;
    let cap = task
        .stop
        .byte_ceiling
        .unwrap_or(cfg.ram_max)
        .min(cfg.ram_max)
        .min(usize::MAX as u64) as usize;
    let mut buf: Vec<u8> = Vec::with_capacity(cap);
    let mut hasher = cfg.hash.map(|h| h.hasher());
    let mut tokens = 0u64;
    loop {
        if task.rt.cancel.is_cancelled() {
            return Err(PumpError::Cancelled);
        }
        if task.stop.done(buf.len() as u64, tokens) {
            break;
        }
        let chunk = source.next_chunk(task.stop.remaining(buf.len() as u64));
        if (buf.len() + chunk.len()) as u64 > cfg.ram_max {
            return Err(PumpError::Config(format!(
                "RAM buffer would exceed --ram-max {}; use --buffer-mode stream or increase --ram-max",
                crate::units::fmt_bytes(cfg.ram_max)
            )));
        }
        task.rt.throttle(chunk.len() as u64);
        if let Some(hasher) = &mut hasher {
            hasher.update(&chunk);
        }
        buf.extend_from_slice(&chunk);
        tokens += 1;
        task.rt.progress.add(chunk.len() as u64);
        task.rt.rss.check()?;
    }
    let mut writer = ChunkWriter::open(cfg, task.target, Arc::clone(&task.rt.progress))?;
    writer.dump(&buf)?;
    writer.tokens = tokens;
    writer.hasher = None;
    let mut outcome = writer.finish()?;
    outcome.hash = hasher.map(|mut h| hex(&h.finalize_reset()));
    Ok(outcome)
}

/// W writer workers sharing one handle under one coarse mutex.
///
/// The critical section covers claim, clip, seek/write, hash, counters, and
/// the fsync decision. Token claims happen under the mutex before
/// generation, so the per-worker counts sum to exactly the configured total.
pub fn multi_writer(task: &PumpTask<'_>, workers: usize) -> Result<PumpOutcome> {
    struct Shared {
        writer: ChunkWriter,
        claimed_tokens: u64,
    }

    let writer = ChunkWriter::open(task.cfg, task.target, Arc::clone(&task.rt.progress))?;
    let shared = Mutex::new(Shared { writer, claimed_tokens: 0 });
    let first_error: Mutex<Option<PumpError>> = Mutex::new(None);

    let worker_loop = |idx: u64| -> Result<()> {
        let mut source = task.spec.build_worker(idx)?;
        loop {
            if task.rt.cancel.is_cancelled() {
                return Err(PumpError::Cancelled);
            }
            let max = {
                let mut guard = shared.lock();
                if task.stop.done(guard.writer.written, guard.claimed_tokens) {
                    return Ok(());
                }
                guard.claimed_tokens += 1;
                task.stop.remaining(guard.writer.written)
            };
            let chunk = source.next_chunk(max);
            task.rt.throttle(chunk.len() as u64);
            {
                let mut guard = shared.lock();
                let remaining = task.stop.remaining(guard.writer.written);
                if remaining == 0 {
                    return Ok(());
                }
                guard.writer.write_chunk(&chunk[..chunk.len().min(remaining)])?;
            }
            task.rt.rss.check()?;
        }
    };

    thread::scope(|scope| {
        for worker_idx in 0..workers {
            let worker_loop = &worker_loop;
            let first_error = &first_error;
            thread::Builder::new()
                .name(format!("pump-writer-{worker_idx}"))
                .spawn_scoped(scope, move || {
                    if let Err(e) = worker_loop(worker_idx as u64) {
                        let mut slot = first_error.lock();
                        if slot.is_none() && !matches!(e, PumpError::Cancelled) {
                            *slot = Some(e);
                        }
                        task.rt.cancel.cancel();
                    }
                })
                .expect("spawn writer worker");
        }
    });

    if let Some(e) = first_error.into_inner() {
        return Err(e);
    }
    let writer = shared.into_inner().writer;
    if task.rt.cancel.is_cancelled() {
        // Cancellation with no recorded error means the signal came from
        // outside; sync and close, keep the partial file.
        writer.finish()?;
        return Err(PumpError::Cancelled);
    }
    writer.finish()
}

/// G generators feeding one writer through a bounded queue.
pub fn pipeline(task: &PumpTask<'_>, generators: usize) -> Result<PumpOutcome> {
    struct Claims {
        produced: u64,
        tokens: u64,
    }

    let mut writer = ChunkWriter::open(task.cfg, task.target, Arc::clone(&task.rt.progress))?;
    let claims = Mutex::new(Claims { produced: 0, tokens: 0 });
    let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(PIPELINE_QUEUE_FACTOR * generators);

    let mut write_result: Result<()> = Ok(());
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(generators);
        for gen_idx in 0..generators {
            let tx = tx.clone();
            let claims = &claims;
            let task_ref = &*task;
            let handle = thread::Builder::new()
                .name(format!("pump-gen-{gen_idx}"))
                .spawn_scoped(scope, move || -> Result<()> {
                    let mut source = task_ref.spec.build_worker(gen_idx as u64)?;
                    loop {
                        if task_ref.rt.cancel.is_cancelled() {
                            return Ok(());
                        }
                        let max = {
                            let mut guard = claims.lock();
                            if task_ref.stop.done(guard.produced, guard.tokens) {
                                return Ok(());
                            }
                            guard.tokens += 1;
                            task_ref.stop.remaining(guard.produced)
                        };
                        let mut chunk = source.next_chunk(max);
                        {
                            let mut guard = claims.lock();
                            let remaining = task_ref.stop.remaining(guard.produced);
                            if remaining == 0 {
                                return Ok(());
                            }
                            chunk.truncate(remaining);
                            guard.produced += chunk.len() as u64;
                        }
                        if tx.send(chunk).is_err() {
                            // Writer went away; nothing left to do.
                            return Ok(());
                        }
                    }
                })
                .expect("spawn generator worker");
            handles.push(handle);
        }
        drop(tx);

        // The single writer drains in FIFO arrival order.
        for chunk in rx.iter() {
            if task.rt.cancel.is_cancelled() {
                break;
            }
            task.rt.throttle(chunk.len() as u64);
            if let Err(e) = writer.write_chunk(&chunk).and_then(|()| task.rt.rss.check()) {
                write_result = Err(e);
                task.rt.cancel.cancel();
                break;
            }
        }
        drop(rx);

        for handle in handles {
            if let Ok(Err(e)) = handle.join().map_err(|_| ()) {
                if write_result.is_ok() {
                    write_result = Err(e);
                    task.rt.cancel.cancel();
                }
            }
        }
    });

    match write_result {
        Ok(()) if task.rt.cancel.is_cancelled() => {
            writer.finish()?;
            Err(PumpError::Cancelled)
        }
        Ok(()) => writer.finish(),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{DictOrder, Encoding};
    use crate::integrity::{hash_file, HashAlgo};
    use crate::token::{CaseMode, NewlinePolicy, NewlineScope, NewlineStyle, PumpMode};
    use std::fs;
    use std::path::Path;

    fn word_spec(word: &str) -> SourceSpec {
        SourceSpec {
            mode: PumpMode::Word,
            word: Some(word.into()),
            case: CaseMode::Fixed,
            dict: None,
            order: DictOrder::Sequential,
            markov: None,
            encoding: Encoding::Utf8,
            newline: NewlinePolicy::default(),
            chunk: 4096,
            seed: Some(1),
        }
    }

    fn binary_spec(mode: PumpMode, chunk: usize) -> SourceSpec {
        SourceSpec { mode, word: None, chunk, ..word_spec("unused") }
    }

    fn cfg_for(path: &Path) -> JobConfig {
        JobConfig { path: path.to_path_buf(), append: false, ..JobConfig::default() }
    }

    fn runtime() -> PumpRuntime {
        PumpRuntime::unthrottled(Arc::new(ProgressCounters::new(None)))
    }

    fn run_stream(
        cfg: &JobConfig,
        stop: StopSet,
        spec: &SourceSpec,
    ) -> Result<PumpOutcome> {
        let target = Target::File(cfg.path.clone());
        let rt = runtime();
        stream(&PumpTask { cfg, target: &target, stop, spec, rt: &rt })
    }

    #[test]
    fn count_bound_word_with_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let cfg = cfg_for(&path);
        let mut spec = word_spec("AB");
        spec.newline = NewlinePolicy { scope: NewlineScope::Word, style: NewlineStyle::Lf };
        let outcome =
            run_stream(&cfg, StopSet { times: Some(5), byte_ceiling: None }, &spec).unwrap();
        assert_eq!(outcome.written, 15);
        assert_eq!(outcome.tokens, 5);
        assert_eq!(fs::read(&path).unwrap(), b"AB\nAB\nAB\nAB\nAB\n");
    }

    #[test]
    fn size_bound_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let cfg = cfg_for(&path);
        let spec = binary_spec(PumpMode::Bin1, 4096);
        let outcome =
            run_stream(&cfg, StopSet { times: None, byte_ceiling: Some(10_000) }, &spec).unwrap();
        assert_eq!(outcome.written, 10_000);
        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 10_000);
        assert!(data.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn max_bytes_clips_the_final_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let cfg = cfg_for(&path);
        let spec = word_spec("ABC");
        let outcome =
            run_stream(&cfg, StopSet { times: Some(100), byte_ceiling: Some(10) }, &spec).unwrap();
        assert_eq!(outcome.written, 10);
        assert_eq!(fs::read(&path).unwrap(), b"ABCABCABCA");
    }

    #[test]
    fn append_preserves_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, b"C").unwrap();
        let mut cfg = cfg_for(&path);
        cfg.append = true;
        let spec = word_spec("X");
        run_stream(&cfg, StopSet { times: Some(10), byte_ceiling: None }, &spec).unwrap();
        assert_eq!(fs::read(&path).unwrap(), [b"C".as_slice(), &[b'X'; 10]].concat());
    }

    #[test]
    fn sparse_zero_fill_keeps_logical_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("z.bin");
        let mut cfg = cfg_for(&path);
        cfg.sparse = true;
        let spec = binary_spec(PumpMode::Bin0, 1024);
        let outcome =
            run_stream(&cfg, StopSet { times: None, byte_ceiling: Some(8192) }, &spec).unwrap();
        assert_eq!(outcome.written, 8192);
        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 8192);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn running_hash_matches_file_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut cfg = cfg_for(&path);
        cfg.hash = Some(HashAlgo::Sha256);
        let spec = binary_spec(PumpMode::RandBin, 4096);
        let outcome =
            run_stream(&cfg, StopSet { times: None, byte_ceiling: Some(65_536) }, &spec).unwrap();
        let running = outcome.hash.unwrap();
        assert_eq!(running, hash_file(&path, HashAlgo::Sha256).unwrap());
    }

    #[test]
    fn sparse_chunks_are_hashed_as_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("z.bin");
        let mut cfg = cfg_for(&path);
        cfg.sparse = true;
        cfg.hash = Some(HashAlgo::Md5);
        let spec = binary_spec(PumpMode::Bin0, 512);
        let outcome =
            run_stream(&cfg, StopSet { times: None, byte_ceiling: Some(4096) }, &spec).unwrap();
        assert_eq!(outcome.hash.unwrap(), hash_file(&path, HashAlgo::Md5).unwrap());
    }

    #[test]
    fn offset_leaves_a_leading_gap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut cfg = cfg_for(&path);
        cfg.offset = Some(4);
        let spec = word_spec("Z");
        run_stream(&cfg, StopSet { times: Some(2), byte_ceiling: None }, &spec).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"\0\0\0\0ZZ");
    }

    #[test]
    fn truncate_to_presizes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut cfg = cfg_for(&path);
        cfg.append = true;
        cfg.truncate_to = Some(100);
        let spec = word_spec("Y");
        run_stream(&cfg, StopSet { times: Some(1), byte_ceiling: None }, &spec).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 101);
    }

    #[test]
    fn gzip_output_round_trips() {
        use std::io::Read;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gz");
        let mut cfg = cfg_for(&path);
        cfg.compress = Compression::Gzip;
        let spec = word_spec("hello");
        run_stream(&cfg, StopSet { times: Some(3), byte_ceiling: None }, &spec).unwrap();

        let mut decoder = flate2::read::GzDecoder::new(fs::File::open(&path).unwrap());
        let mut body = String::new();
        decoder.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hellohellohello");
    }

    #[test]
    fn cancelled_stream_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let cfg = cfg_for(&path);
        let spec = binary_spec(PumpMode::Bin0, 1024);
        let target = Target::File(path.clone());
        let rt = runtime();
        rt.cancel.cancel();
        let err = stream(&PumpTask {
            cfg: &cfg,
            target: &target,
            stop: StopSet { times: None, byte_ceiling: Some(1 << 20) },
            spec: &spec,
            rt: &rt,
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 130);
        assert!(path.exists());
    }

    #[test]
    fn buffer_dump_matches_streaming_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ram.bin");
        let cfg = cfg_for(&path);
        let spec = binary_spec(PumpMode::Bin0, 1024);
        let target = Target::File(path.clone());
        let rt = runtime();
        let outcome = buffer(&PumpTask {
            cfg: &cfg,
            target: &target,
            stop: StopSet { times: None, byte_ceiling: Some(8192) },
            spec: &spec,
            rt: &rt,
        })
        .unwrap();
        assert_eq!(outcome.written, 8192);
        assert_eq!(fs::metadata(&path).unwrap().len(), 8192);
    }

    #[test]
    fn buffer_overflow_names_the_remedy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ram.bin");
        let mut cfg = cfg_for(&path);
        cfg.ram_max = 512;
        let spec = word_spec("abcdefgh");
        let target = Target::File(path);
        let rt = runtime();
        let err = buffer(&PumpTask {
            cfg: &cfg,
            target: &target,
            stop: StopSet { times: Some(1000), byte_ceiling: None },
            spec: &spec,
            rt: &rt,
        })
        .unwrap_err();
        assert!(err.to_string().contains("--buffer-mode stream"), "{err}");
    }

    #[test]
    fn buffer_reports_the_fill_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ram.bin");
        let mut cfg = cfg_for(&path);
        cfg.hash = Some(HashAlgo::Sha1);
        let spec = word_spec("Q");
        let target = Target::File(path.clone());
        let rt = runtime();
        let outcome = buffer(&PumpTask {
            cfg: &cfg,
            target: &target,
            stop: StopSet { times: Some(4), byte_ceiling: None },
            spec: &spec,
            rt: &rt,
        })
        .unwrap();
        assert_eq!(outcome.hash.unwrap(), hash_file(&path, HashAlgo::Sha1).unwrap());
    }

    #[test]
    fn multi_writer_append_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("existing.txt");
        fs::write(&path, b"prior-content|").unwrap();
        let mut cfg = cfg_for(&path);
        cfg.append = true;
        let spec = word_spec("X");
        let target = Target::File(path.clone());
        let rt = runtime();
        let outcome = multi_writer(
            &PumpTask {
                cfg: &cfg,
                target: &target,
                stop: StopSet { times: Some(10_000), byte_ceiling: None },
                spec: &spec,
                rt: &rt,
            },
            4,
        )
        .unwrap();
        assert_eq!(outcome.tokens, 10_000);
        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), b"prior-content|".len() + 10_000);
        assert!(data.ends_with(&[b'X'; 64]));
    }

    #[test]
    fn multi_writer_size_bound_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let cfg = cfg_for(&path);
        let spec = binary_spec(PumpMode::Bin1, 1024);
        let target = Target::File(path.clone());
        let rt = runtime();
        let outcome = multi_writer(
            &PumpTask {
                cfg: &cfg,
                target: &target,
                stop: StopSet { times: None, byte_ceiling: Some(100_000) },
                spec: &spec,
                rt: &rt,
            },
            3,
        )
        .unwrap();
        assert_eq!(outcome.written, 100_000);
        assert_eq!(fs::metadata(&path).unwrap().len(), 100_000);
    }

    #[test]
    fn pipeline_size_bound_is_exact_and_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.hex");
        let cfg = cfg_for(&path);
        let spec = binary_spec(PumpMode::RandHex, 2048);
        let target = Target::File(path.clone());
        let rt = runtime();
        let outcome = pipeline(
            &PumpTask {
                cfg: &cfg,
                target: &target,
                stop: StopSet { times: None, byte_ceiling: Some(50_000) },
                spec: &spec,
                rt: &rt,
            },
            3,
        )
        .unwrap();
        assert_eq!(outcome.written, 50_000);
        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 50_000);
        assert!(data.iter().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn pipeline_count_bound_token_total() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let cfg = cfg_for(&path);
        let spec = word_spec("ab");
        let target = Target::File(path.clone());
        let rt = runtime();
        let outcome = pipeline(
            &PumpTask {
                cfg: &cfg,
                target: &target,
                stop: StopSet { times: Some(500), byte_ceiling: None },
                spec: &spec,
                rt: &rt,
            },
            2,
        )
        .unwrap();
        assert_eq!(outcome.written, 1000);
        assert_eq!(fs::metadata(&path).unwrap().len(), 1000);
    }
}
