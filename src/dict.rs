// src/dict.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dictionary loading and ordering.
//!
//! Dictionaries are loaded fully into RAM once, then shared read-only across
//! workers. A wordlist is one token per line; a trailing numeric field on a
//! line (`token 3.5`) is treated as a draw weight for random order. List
//! files name one wordlist per line, `#` comments allowed, relative paths
//! resolved against the list file's directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PumpError, Result};

/// Text encoding for dictionary files and token output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Latin1,
}

impl Encoding {
    /// Encode a string under this encoding. Latin-1 maps unrepresentable
    /// characters to `?`, mirroring a lossy text-mode write.
    pub fn encode(&self, s: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => s.as_bytes().to_vec(),
            Encoding::Latin1 => s
                .chars()
                .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
                .collect(),
        }
    }

    fn decode(&self, raw: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(raw).into_owned(),
            Encoding::Latin1 => raw.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Probe a file's encoding: UTF-8 if the head decodes cleanly, else Latin-1.
pub fn detect_encoding(path: &Path) -> Encoding {
    match fs::read(path) {
        Ok(raw) => {
            let head = &raw[..raw.len().min(4096)];
            if std::str::from_utf8(head).is_ok() {
                Encoding::Utf8
            } else {
                Encoding::Latin1
            }
        }
        Err(_) => Encoding::Utf8,
    }
}

/// Iteration order over a dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DictOrder {
    /// File order, wrapping at the end.
    Sequential,
    /// Loaded-reverse order, wrapping.
    Reverse,
    /// Lexicographic ascending, wrapping.
    Presorted,
    /// Uniform (or weighted) random with replacement.
    #[default]
    Random,
}

/// A preloaded, read-only wordlist.
#[derive(Debug)]
pub struct Dictionary {
    tokens: Vec<String>,
    /// Parallel to `tokens`; present only if any source line carried a weight.
    weights: Option<Vec<f64>>,
}

impl Dictionary {
    /// Load and order tokens from one or more wordlist files.
    ///
    /// An empty result is a fatal configuration error: every pump mode
    /// assumes the token stream is infinite.
    pub fn load(paths: &[PathBuf], encoding: Encoding, order: DictOrder) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut weights = Vec::new();
        let mut any_weight = false;
        for path in paths {
            let raw = fs::read(path).map_err(|e| PumpError::io(path, e))?;
            for line in encoding.decode(&raw).lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match split_weight(line) {
                    Some((token, w)) => {
                        any_weight = true;
                        tokens.push(token.to_string());
                        weights.push(w.max(0.0));
                    }
                    None => {
                        tokens.push(line.to_string());
                        weights.push(1.0);
                    }
                }
            }
        }
        if tokens.is_empty() {
            return Err(PumpError::Config(format!(
                "dictionary is empty: {}",
                paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        match order {
            DictOrder::Sequential | DictOrder::Random => {}
            DictOrder::Reverse => {
                tokens.reverse();
                weights.reverse();
            }
            DictOrder::Presorted => {
                let mut idx: Vec<usize> = (0..tokens.len()).collect();
                idx.sort_by(|&a, &b| tokens[a].cmp(&tokens[b]));
                tokens = idx.iter().map(|&i| tokens[i].clone()).collect();
                weights = idx.iter().map(|&i| weights[i]).collect();
            }
        }
        tracing::debug!(tokens = tokens.len(), weighted = any_weight, ?order, "dictionary loaded");
        Ok(Self { tokens, weights: any_weight.then_some(weights) })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, i: usize) -> &str {
        &self.tokens[i]
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Cumulative weights for weighted random draws, if any line had one.
    /// A degenerate all-zero weighting falls back to uniform draws.
    pub fn cumulative_weights(&self) -> Option<Vec<f64>> {
        let weights = self.weights.as_ref()?;
        let mut acc = 0.0;
        let cum: Vec<f64> = weights
            .iter()
            .map(|w| {
                acc += w;
                acc
            })
            .collect();
        (acc > 0.0).then_some(cum)
    }
}

/// Resolve a dictionary list file into wordlist paths.
pub fn read_dict_list(list_path: &Path) -> Result<Vec<PathBuf>> {
    let text =
        fs::read_to_string(list_path).map_err(|e| PumpError::io(list_path, e))?;
    let base = list_path.parent().unwrap_or_else(|| Path::new("."));
    let mut paths = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let p = PathBuf::from(line);
        paths.push(if p.is_absolute() { p } else { base.join(p) });
    }
    Ok(paths)
}

/// Split a `token weight` line; `None` when the trailing field is not numeric.
fn split_weight(line: &str) -> Option<(&str, f64)> {
    let (head, tail) = line.rsplit_once(char::is_whitespace)?;
    let w: f64 = tail.parse().ok()?;
    Some((head.trim_end(), w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let p = dir.join(name);
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(content).unwrap();
        p
    }

    #[test]
    fn loads_in_requested_orders() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(dir.path(), "w.txt", b"beta\nalpha\ngamma\n");

        let seq = Dictionary::load(&[p.clone()], Encoding::Utf8, DictOrder::Sequential).unwrap();
        assert_eq!(seq.tokens(), ["beta", "alpha", "gamma"]);

        let rev = Dictionary::load(&[p.clone()], Encoding::Utf8, DictOrder::Reverse).unwrap();
        assert_eq!(rev.tokens(), ["gamma", "alpha", "beta"]);

        let sorted = Dictionary::load(&[p], Encoding::Utf8, DictOrder::Presorted).unwrap();
        assert_eq!(sorted.tokens(), ["alpha", "beta", "gamma"]);
    }

    #[test]
    fn parses_weights() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(dir.path(), "w.txt", b"heavy 3\nlight 1\nplain\n");
        let d = Dictionary::load(&[p], Encoding::Utf8, DictOrder::Random).unwrap();
        assert_eq!(d.tokens(), ["heavy", "light", "plain"]);
        let cum = d.cumulative_weights().unwrap();
        assert_eq!(cum, [3.0, 4.0, 5.0]);
    }

    #[test]
    fn empty_dictionary_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_file(dir.path(), "w.txt", b"\n\n");
        assert!(Dictionary::load(&[p], Encoding::Utf8, DictOrder::Sequential).is_err());
    }

    #[test]
    fn latin1_fallback_detection() {
        let dir = tempfile::tempdir().unwrap();
        let utf8 = write_file(dir.path(), "u.txt", "caf\u{e9}\n".as_bytes());
        assert_eq!(detect_encoding(&utf8), Encoding::Utf8);
        let latin = write_file(dir.path(), "l.txt", &[b'c', b'a', b'f', 0xe9, b'\n']);
        assert_eq!(detect_encoding(&latin), Encoding::Latin1);

        let d = Dictionary::load(&[latin], Encoding::Latin1, DictOrder::Sequential).unwrap();
        assert_eq!(d.token(0), "caf\u{e9}");
        assert_eq!(Encoding::Latin1.encode(d.token(0)), [b'c', b'a', b'f', 0xe9]);
    }

    #[test]
    fn dict_list_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", b"one\n");
        let abs = write_file(dir.path(), "b.txt", b"two\n");
        let list = write_file(
            dir.path(),
            "list.txt",
            format!("# comment\na.txt\n\n{}\n", abs.display()).as_bytes(),
        );
        let paths = read_dict_list(&list).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0], dir.path().join("a.txt"));
        assert_eq!(paths[1], abs);
    }
}
