// src/integrity.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running hashes and post-write verification.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use digest::DynDigest;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::constants::VERIFY_READ_BLOCK;
use crate::error::{PumpError, Result};

/// Supported running-hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgo {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(PumpError::Config(format!("unknown hash algorithm: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Fresh hasher behind the object-safe digest trait.
    pub fn hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            Self::Md5 => Box::new(Md5::default()),
            Self::Sha1 => Box::new(Sha1::default()),
            Self::Sha256 => Box::new(Sha256::default()),
            Self::Sha512 => Box::new(Sha512::default()),
        }
    }
}

/// Lowercase hex of a digest.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Hash a file by sequential re-read, for verify-on-close.
pub fn hash_file(path: &Path, algo: HashAlgo) -> Result<String> {
    let mut file = File::open(path).map_err(|e| PumpError::io(path, e))?;
    let mut hasher = algo.hasher();
    let mut buf = vec![0u8; VERIFY_READ_BLOCK];
    loop {
        let n = file.read(&mut buf).map_err(|e| PumpError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}
