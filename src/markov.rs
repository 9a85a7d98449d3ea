// src/markov.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Word-level N-gram model over a dictionary.
//!
//! Built once from the materialized token sequence and shared read-only.
//! Each prefix of `n-1` tokens maps to a successor vector in insertion
//! order; sampling draws a successor by cumulative-count binary search so a
//! seeded stream is reproducible regardless of map iteration order.

use std::collections::HashMap;

use rand::Rng;

use crate::dict::Dictionary;
use crate::error::{PumpError, Result};

#[derive(Debug, Default)]
struct SuccessorSet {
    /// (token index, occurrence count), insertion order preserved.
    entries: Vec<(u32, u32)>,
    /// Running totals over `entries`, rebuilt on `seal`.
    cumulative: Vec<u64>,
    total: u64,
}

impl SuccessorSet {
    fn add(&mut self, token: u32) {
        match self.entries.iter_mut().find(|(t, _)| *t == token) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((token, 1)),
        }
    }

    fn seal(&mut self) {
        let mut acc = 0u64;
        self.cumulative = self
            .entries
            .iter()
            .map(|&(_, c)| {
                acc += u64::from(c);
                acc
            })
            .collect();
        self.total = acc;
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> u32 {
        let pick = rng.random_range(0..self.total);
        let i = self.cumulative.partition_point(|&c| c <= pick);
        self.entries[i].0
    }
}

/// An order-`n` Markov chain over dictionary tokens.
#[derive(Debug)]
pub struct MarkovModel {
    n: usize,
    /// Prefixes in first-seen order, so seeded restarts are deterministic.
    prefixes: Vec<Vec<u32>>,
    transitions: HashMap<Vec<u32>, SuccessorSet>,
}

impl MarkovModel {
    /// Build the chain from the dictionary's token sequence.
    ///
    /// A corpus shorter than `n` produces an empty chain; the token source
    /// falls back to cycling the dictionary sequentially in that case.
    pub fn build(dict: &Dictionary, n: usize) -> Result<Self> {
        if n < 2 {
            return Err(PumpError::Config(format!("--ngram must be >= 2, got {n}")));
        }
        let seq: Vec<u32> = (0..dict.len() as u32).collect();
        let mut prefixes = Vec::new();
        let mut transitions: HashMap<Vec<u32>, SuccessorSet> = HashMap::new();
        if seq.len() >= n {
            for window in seq.windows(n) {
                let prefix = window[..n - 1].to_vec();
                let next = window[n - 1];
                let set = transitions.entry(prefix.clone()).or_insert_with(|| {
                    prefixes.push(prefix);
                    SuccessorSet::default()
                });
                set.add(next);
            }
        }
        for set in transitions.values_mut() {
            set.seal();
        }
        tracing::debug!(order = n, prefixes = prefixes.len(), "markov model built");
        Ok(Self { n, prefixes, transitions })
    }

    pub fn order(&self) -> usize {
        self.n
    }

    /// True when the corpus was too short to form any transition.
    pub fn is_degenerate(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Pick a starting prefix.
    pub fn start_prefix<R: Rng>(&self, rng: &mut R) -> Vec<u32> {
        self.prefixes[rng.random_range(0..self.prefixes.len())].clone()
    }

    /// Sample the successor of `prefix`, re-seeding from a random prefix on
    /// a dead end. Returns the emitted token index and updates the prefix.
    pub fn step<R: Rng>(&self, prefix: &mut Vec<u32>, rng: &mut R) -> u32 {
        loop {
            if let Some(set) = self.transitions.get(prefix.as_slice()) {
                let next = set.sample(rng);
                prefix.remove(0);
                prefix.push(next);
                return next;
            }
            *prefix = self.start_prefix(rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{DictOrder, Encoding};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use std::io::Write;

    fn dict_from(words: &str) -> Dictionary {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("w.txt");
        let mut f = std::fs::File::create(&p).unwrap();
        f.write_all(words.as_bytes()).unwrap();
        Dictionary::load(&[p], Encoding::Utf8, DictOrder::Sequential).unwrap()
    }

    #[test]
    fn bigram_transitions_follow_the_corpus() {
        // a -> b, b -> a, b -> c; prefix [c] is a dead end.
        let dict = dict_from("a\nb\na\nb\nc\n");
        let model = MarkovModel::build(&dict, 2).unwrap();
        assert!(!model.is_degenerate());

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let mut prefix = vec![0u32]; // "a"
        for _ in 0..64 {
            let next = model.step(&mut prefix, &mut rng);
            assert!((next as usize) < dict.len());
        }
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let dict = dict_from("one\ntwo\nthree\ntwo\nfour\n");
        let model = MarkovModel::build(&dict, 2).unwrap();

        let run = |seed: u64| -> Vec<u32> {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            let mut prefix = model.start_prefix(&mut rng);
            (0..32).map(|_| model.step(&mut prefix, &mut rng)).collect()
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn short_corpus_is_degenerate() {
        let dict = dict_from("only\n");
        let model = MarkovModel::build(&dict, 3).unwrap();
        assert!(model.is_degenerate());
    }

    #[test]
    fn order_below_two_is_rejected() {
        let dict = dict_from("a\nb\n");
        assert!(MarkovModel::build(&dict, 1).is_err());
    }
}
