// src/token.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token sources: lazy, infinite, restartable byte streams.
//!
//! Every pump mode is a variant of one concrete generator behind a single
//! `next_chunk` operation. A source never returns an empty chunk; the writer
//! stops the stream by ceasing to call. Seeded sources are reproducible, and
//! worker streams derive their seed from the master seed plus the worker
//! index so concurrent jobs stay deterministic per worker.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::dict::{DictOrder, Dictionary, Encoding};
use crate::error::{PumpError, Result};
use crate::markov::MarkovModel;

/// Which generator produces bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpMode {
    /// Encoded word or dictionary tokens.
    Word,
    /// 0xFF fill.
    Bin1,
    /// 0x00 fill.
    Bin0,
    /// Cryptographically strong random bytes.
    RandBin,
    /// Printable ASCII subset, UTF-8 encoded.
    RandUtf8,
    /// Lowercase hex expansion of random bytes.
    RandHex,
    /// One of {randbin, randutf8, randhex}, picked per chunk.
    Random,
}

/// Where newlines are inserted in text output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NewlineScope {
    #[default]
    None,
    /// After each token.
    Word,
    /// After each character of each token.
    Char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NewlineStyle {
    #[default]
    Lf,
    Cr,
    Crlf,
}

impl NewlineStyle {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            NewlineStyle::Lf => b"\n",
            NewlineStyle::Cr => b"\r",
            NewlineStyle::Crlf => b"\r\n",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NewlinePolicy {
    pub scope: NewlineScope,
    pub style: NewlineStyle,
}

/// Fixed-word case handling: keep as given, or flip the whole token per draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseMode {
    #[default]
    Fixed,
    Random,
}

/// Everything needed to build a token source, cheap to clone across workers.
/// Dictionaries and models are shared read-only.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub mode: PumpMode,
    pub word: Option<String>,
    pub case: CaseMode,
    pub dict: Option<Arc<Dictionary>>,
    pub order: DictOrder,
    pub markov: Option<Arc<MarkovModel>>,
    pub encoding: Encoding,
    pub newline: NewlinePolicy,
    pub chunk: usize,
    pub seed: Option<u64>,
}

impl SourceSpec {
    /// Build the stream for the primary (or only) worker.
    pub fn build(&self) -> Result<TokenSource> {
        self.build_worker(0)
    }

    /// Build a worker's stream with a deterministically derived seed.
    pub fn build_worker(&self, worker: u64) -> Result<TokenSource> {
        let seed = self.seed.map(|s| mix_seed(s, worker));
        TokenSource::new(self, seed)
    }

    /// Encoded length of one token for a fixed-word stream, if knowable
    /// up front. Used by the disk guard to estimate count-bound output.
    pub fn fixed_token_len(&self) -> Option<u64> {
        if self.mode != PumpMode::Word || self.dict.is_some() || self.case != CaseMode::Fixed {
            return None;
        }
        let word = self.word.as_deref()?;
        Some(encode_token(word, self.encoding, self.newline).len() as u64)
    }
}

/// Golden-ratio mixing keeps derived worker seeds well separated.
fn mix_seed(seed: u64, worker: u64) -> u64 {
    seed ^ worker.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Per-call entropy from time + the OS RNG, for unseeded streams.
fn call_entropy() -> u64 {
    let time_entropy = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    time_entropy.wrapping_add(rand::rng().next_u64())
}

enum SourceKind {
    FixedWord { word: String, case: CaseMode },
    Dict { dict: Arc<Dictionary>, order: DictOrder, cursor: usize, cumulative: Option<Vec<f64>> },
    Markov { dict: Arc<Dictionary>, model: Arc<MarkovModel>, prefix: Vec<u32>, cursor: usize },
    Fill { byte: u8 },
    RandBin,
    RandUtf8,
    RandHex,
    Random,
}

/// A restartable infinite byte stream. One `next_chunk` call emits one token
/// (text modes) or one chunk (binary modes).
pub struct TokenSource {
    kind: SourceKind,
    encoding: Encoding,
    newline: NewlinePolicy,
    chunk: usize,
    rng: Xoshiro256PlusPlus,
    seed: Option<u64>,
}

impl TokenSource {
    fn new(spec: &SourceSpec, seed: Option<u64>) -> Result<Self> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed.unwrap_or_else(call_entropy));
        let kind = match spec.mode {
            PumpMode::Word => match (&spec.markov, &spec.dict) {
                (Some(model), Some(dict)) => {
                    let prefix = if model.is_degenerate() {
                        Vec::new()
                    } else {
                        model.start_prefix(&mut rng)
                    };
                    SourceKind::Markov {
                        dict: Arc::clone(dict),
                        model: Arc::clone(model),
                        prefix,
                        cursor: 0,
                    }
                }
                (None, Some(dict)) => SourceKind::Dict {
                    cumulative: dict.cumulative_weights(),
                    dict: Arc::clone(dict),
                    order: spec.order,
                    cursor: 0,
                },
                _ => {
                    let word = spec.word.clone().ok_or_else(|| {
                        PumpError::Config("--word is required for pump-mode=word without --dict".into())
                    })?;
                    SourceKind::FixedWord { word, case: spec.case }
                }
            },
            PumpMode::Bin1 => SourceKind::Fill { byte: 0xFF },
            PumpMode::Bin0 => SourceKind::Fill { byte: 0x00 },
            PumpMode::RandBin => SourceKind::RandBin,
            PumpMode::RandUtf8 => SourceKind::RandUtf8,
            PumpMode::RandHex => SourceKind::RandHex,
            PumpMode::Random => SourceKind::Random,
        };
        Ok(Self { kind, encoding: spec.encoding, newline: spec.newline, chunk: spec.chunk, rng, seed })
    }

    /// Produce the next chunk, at most `max` bytes. Text tokens larger than
    /// `max` are clipped; the writer only clips against a byte ceiling.
    pub fn next_chunk(&mut self, max: usize) -> Vec<u8> {
        let mut out = match &mut self.kind {
            SourceKind::FixedWord { word, case } => {
                let token = match case {
                    CaseMode::Fixed => word.clone(),
                    CaseMode::Random => {
                        if self.rng.random_bool(0.5) {
                            word.to_uppercase()
                        } else {
                            word.to_lowercase()
                        }
                    }
                };
                encode_token(&token, self.encoding, self.newline)
            }
            SourceKind::Dict { dict, order, cursor, cumulative } => {
                let i = match order {
                    DictOrder::Random => match cumulative {
                        Some(cum) => {
                            let total = *cum.last().unwrap_or(&0.0);
                            let pick = self.rng.random_range(0.0..total);
                            cum.partition_point(|&c| c <= pick).min(dict.len() - 1)
                        }
                        None => self.rng.random_range(0..dict.len()),
                    },
                    // Reverse and presorted were applied at load time.
                    _ => {
                        let i = *cursor;
                        *cursor = (*cursor + 1) % dict.len();
                        i
                    }
                };
                encode_token(dict.token(i), self.encoding, self.newline)
            }
            SourceKind::Markov { dict, model, prefix, cursor } => {
                let i = if model.is_degenerate() {
                    let i = *cursor;
                    *cursor = (*cursor + 1) % dict.len();
                    i as u32
                } else {
                    model.step(prefix, &mut self.rng)
                };
                encode_token(dict.token(i as usize), self.encoding, self.newline)
            }
            SourceKind::Fill { byte } => vec![*byte; self.chunk.min(max)],
            SourceKind::RandBin => {
                let mut buf = vec![0u8; self.chunk.min(max)];
                rand::rng().fill_bytes(&mut buf);
                buf
            }
            SourceKind::RandUtf8 => {
                let n = self.chunk.min(max);
                (0..n).map(|_| self.rng.random_range(b'!'..=b'~')).collect()
            }
            SourceKind::RandHex => {
                let n = self.chunk.min(max);
                let mut raw = vec![0u8; n.div_ceil(2)];
                rand::rng().fill_bytes(&mut raw);
                let mut hex = Vec::with_capacity(raw.len() * 2);
                for b in raw {
                    hex.push(HEX_DIGITS[(b >> 4) as usize]);
                    hex.push(HEX_DIGITS[(b & 0x0F) as usize]);
                }
                hex.truncate(n);
                hex
            }
            SourceKind::Random => {
                let mode = match self.rng.random_range(0..3u8) {
                    0 => PumpMode::RandBin,
                    1 => PumpMode::RandUtf8,
                    _ => PumpMode::RandHex,
                };
                return self.sub_chunk(mode, max);
            }
        };
        out.truncate(max);
        out
    }

    /// Restart the stream. A configured seed reproduces the original draws;
    /// otherwise the stream restarts from fresh entropy.
    pub fn restart(&mut self) {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(self.seed.unwrap_or_else(call_entropy));
        match &mut self.kind {
            SourceKind::Dict { cursor, .. } => *cursor = 0,
            SourceKind::Markov { model, prefix, cursor, .. } => {
                *cursor = 0;
                if !model.is_degenerate() {
                    *prefix = model.start_prefix(&mut self.rng);
                }
            }
            _ => {}
        }
    }

    /// Generate one chunk of a delegated mode (used by `Random`).
    fn sub_chunk(&mut self, mode: PumpMode, max: usize) -> Vec<u8> {
        let n = self.chunk.min(max);
        match mode {
            PumpMode::RandBin => {
                let mut buf = vec![0u8; n];
                rand::rng().fill_bytes(&mut buf);
                buf
            }
            PumpMode::RandUtf8 => (0..n).map(|_| self.rng.random_range(b'!'..=b'~')).collect(),
            _ => {
                let mut raw = vec![0u8; n.div_ceil(2)];
                rand::rng().fill_bytes(&mut raw);
                let mut hex = Vec::with_capacity(raw.len() * 2);
                for b in raw {
                    hex.push(HEX_DIGITS[(b >> 4) as usize]);
                    hex.push(HEX_DIGITS[(b & 0x0F) as usize]);
                }
                hex.truncate(n);
                hex
            }
        }
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Encode a token under the newline policy.
fn encode_token(token: &str, encoding: Encoding, newline: NewlinePolicy) -> Vec<u8> {
    let nl = newline.style.bytes();
    match newline.scope {
        NewlineScope::None => encoding.encode(token),
        NewlineScope::Word => {
            let mut out = encoding.encode(token);
            out.extend_from_slice(nl);
            out
        }
        NewlineScope::Char => {
            let mut out = Vec::with_capacity(token.len() * 2);
            let mut buf = [0u8; 4];
            for c in token.chars() {
                out.extend_from_slice(&encoding.encode(c.encode_utf8(&mut buf)));
                out.extend_from_slice(nl);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::DictOrder;
    use std::io::Write;

    fn spec() -> SourceSpec {
        SourceSpec {
            mode: PumpMode::Word,
            word: Some("AB".into()),
            case: CaseMode::Fixed,
            dict: None,
            order: DictOrder::Sequential,
            markov: None,
            encoding: Encoding::Utf8,
            newline: NewlinePolicy::default(),
            chunk: 8192,
            seed: Some(1),
        }
    }

    fn load_dict(words: &str, order: DictOrder) -> Arc<Dictionary> {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("w.txt");
        let mut f = std::fs::File::create(&p).unwrap();
        f.write_all(words.as_bytes()).unwrap();
        Arc::new(Dictionary::load(&[p], Encoding::Utf8, order).unwrap())
    }

    #[test]
    fn fixed_word_with_word_newlines() {
        let mut s = spec();
        s.newline = NewlinePolicy { scope: NewlineScope::Word, style: NewlineStyle::Lf };
        let mut src = s.build().unwrap();
        assert_eq!(src.next_chunk(usize::MAX), b"AB\n");
        assert_eq!(src.next_chunk(usize::MAX), b"AB\n");
    }

    #[test]
    fn fixed_word_with_char_newlines_and_crlf() {
        let mut s = spec();
        s.newline = NewlinePolicy { scope: NewlineScope::Char, style: NewlineStyle::Crlf };
        let mut src = s.build().unwrap();
        assert_eq!(src.next_chunk(usize::MAX), b"A\r\nB\r\n");
    }

    #[test]
    fn fixed_word_clips_to_max() {
        let mut src = spec().build().unwrap();
        assert_eq!(src.next_chunk(1), b"A");
    }

    #[test]
    fn fixed_token_len_accounts_for_newlines() {
        let mut s = spec();
        assert_eq!(s.fixed_token_len(), Some(2));
        s.newline = NewlinePolicy { scope: NewlineScope::Word, style: NewlineStyle::Crlf };
        assert_eq!(s.fixed_token_len(), Some(4));
        s.newline = NewlinePolicy { scope: NewlineScope::Char, style: NewlineStyle::Lf };
        assert_eq!(s.fixed_token_len(), Some(4));
    }

    #[test]
    fn fills_are_constant() {
        let mut s = spec();
        s.mode = PumpMode::Bin0;
        s.chunk = 16;
        let mut src = s.build().unwrap();
        assert_eq!(src.next_chunk(usize::MAX), vec![0u8; 16]);
        assert_eq!(src.next_chunk(5), vec![0u8; 5]);

        s.mode = PumpMode::Bin1;
        let mut src = s.build().unwrap();
        assert_eq!(src.next_chunk(usize::MAX), vec![0xFFu8; 16]);
    }

    #[test]
    fn randhex_is_lowercase_hex() {
        let mut s = spec();
        s.mode = PumpMode::RandHex;
        s.chunk = 64;
        let mut src = s.build().unwrap();
        let chunk = src.next_chunk(usize::MAX);
        assert_eq!(chunk.len(), 64);
        assert!(chunk.iter().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        // Odd requests round up internally, then clip.
        assert_eq!(src.next_chunk(7).len(), 7);
    }

    #[test]
    fn randutf8_stays_printable() {
        let mut s = spec();
        s.mode = PumpMode::RandUtf8;
        s.chunk = 256;
        let mut src = s.build().unwrap();
        let chunk = src.next_chunk(usize::MAX);
        assert!(chunk.iter().all(|&b| (b'!'..=b'~').contains(&b)));
        assert!(std::str::from_utf8(&chunk).is_ok());
    }

    #[test]
    fn random_mode_emits_known_shapes() {
        let mut s = spec();
        s.mode = PumpMode::Random;
        s.chunk = 32;
        let mut src = s.build().unwrap();
        for _ in 0..16 {
            let chunk = src.next_chunk(usize::MAX);
            assert!(!chunk.is_empty());
            assert!(chunk.len() <= 32);
        }
    }

    #[test]
    fn dict_sequential_wraps() {
        let dict = load_dict("alpha\nbeta\ngamma\ndelta\n", DictOrder::Sequential);
        let mut s = spec();
        s.word = None;
        s.dict = Some(dict);
        s.newline = NewlinePolicy { scope: NewlineScope::Word, style: NewlineStyle::Lf };
        let mut src = s.build().unwrap();
        let drawn: Vec<Vec<u8>> = (0..5).map(|_| src.next_chunk(usize::MAX)).collect();
        assert_eq!(drawn[0], b"alpha\n");
        assert_eq!(drawn[3], b"delta\n");
        assert_eq!(drawn[4], b"alpha\n");
    }

    #[test]
    fn dict_random_is_seeded() {
        let dict = load_dict("a\nb\nc\nd\ne\n", DictOrder::Random);
        let mut s = spec();
        s.word = None;
        s.dict = Some(dict);
        let draw = |s: &SourceSpec| -> Vec<Vec<u8>> {
            let mut src = s.build().unwrap();
            (0..16).map(|_| src.next_chunk(usize::MAX)).collect()
        };
        assert_eq!(draw(&s), draw(&s));
    }

    #[test]
    fn weighted_dict_random_prefers_heavy_tokens() {
        let dict = load_dict("heavy 1000\nlight 1\n", DictOrder::Random);
        let mut s = spec();
        s.word = None;
        s.dict = Some(dict);
        let mut src = s.build().unwrap();
        let heavy = (0..200)
            .filter(|_| src.next_chunk(usize::MAX) == b"heavy")
            .count();
        assert!(heavy > 150, "expected heavy to dominate, got {heavy}/200");
    }

    #[test]
    fn worker_streams_diverge_but_reproduce() {
        let dict = load_dict("a\nb\nc\nd\ne\nf\ng\nh\n", DictOrder::Random);
        let mut s = spec();
        s.word = None;
        s.dict = Some(dict);
        let draw = |w: u64| -> Vec<Vec<u8>> {
            let mut src = s.build_worker(w).unwrap();
            (0..32).map(|_| src.next_chunk(usize::MAX)).collect()
        };
        assert_eq!(draw(1), draw(1));
        assert_ne!(draw(1), draw(2));
    }

    #[test]
    fn restart_reproduces_seeded_stream() {
        let dict = load_dict("x\ny\nz\n", DictOrder::Random);
        let mut s = spec();
        s.word = None;
        s.dict = Some(dict);
        let mut src = s.build().unwrap();
        let first: Vec<Vec<u8>> = (0..8).map(|_| src.next_chunk(usize::MAX)).collect();
        src.restart();
        let second: Vec<Vec<u8>> = (0..8).map(|_| src.next_chunk(usize::MAX)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn markov_emits_dictionary_tokens() {
        let dict = load_dict("the\nquick\nbrown\nfox\nthe\nlazy\ndog\n", DictOrder::Sequential);
        let model = Arc::new(MarkovModel::build(&dict, 2).unwrap());
        let mut s = spec();
        s.word = None;
        s.dict = Some(Arc::clone(&dict));
        s.markov = Some(model);
        let mut src = s.build().unwrap();
        for _ in 0..32 {
            let token = src.next_chunk(usize::MAX);
            let token = String::from_utf8(token).unwrap();
            assert!(dict.tokens().contains(&token), "unexpected token {token}");
        }
    }

    #[test]
    fn missing_word_is_config_error() {
        let mut s = spec();
        s.word = None;
        assert!(s.build().is_err());
    }
}
