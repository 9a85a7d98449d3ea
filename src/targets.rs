// src/targets.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Target enumeration: one destination per resolved entry.
//!
//! The positional path may be `-` (standard output), a regular file (existing
//! or not), or a directory whose files are pumped in sorted order. A filelist
//! replaces the positional path: one path per line, `#` comments, relative
//! entries resolved against the list file's directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PumpError, Result};

/// One destination of bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Stdout,
    File(PathBuf),
}

impl Target {
    pub fn is_stdout(&self) -> bool {
        matches!(self, Target::Stdout)
    }

    /// File path, if this is a file target.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Target::Stdout => None,
            Target::File(p) => Some(p),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Target::Stdout => "-".into(),
            Target::File(p) => p.display().to_string(),
        }
    }
}

/// Resolve the job's targets. With a filelist, the positional path is not
/// consulted (each list entry is expanded like a positional path).
pub fn resolve(positional: &Path, filelist: Option<&Path>, recursive: bool) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    match filelist {
        Some(list_path) => {
            let text = fs::read_to_string(list_path).map_err(|e| PumpError::io(list_path, e))?;
            let base = list_path.parent().unwrap_or_else(|| Path::new("."));
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let p = PathBuf::from(line);
                let p = if p.is_absolute() { p } else { base.join(p) };
                expand_path(&p, recursive, &mut targets)?;
            }
        }
        None => expand_path(positional, recursive, &mut targets)?,
    }
    if targets.is_empty() {
        return Err(PumpError::NoTargets);
    }
    Ok(targets)
}

fn expand_path(path: &Path, recursive: bool, out: &mut Vec<Target>) -> Result<()> {
    if path == Path::new("-") {
        out.push(Target::Stdout);
        return Ok(());
    }
    if path.is_dir() {
        let mut files = Vec::new();
        collect_files(path, recursive, &mut files)?;
        files.sort();
        out.extend(files.into_iter().map(Target::File));
        return Ok(());
    }
    out.push(Target::File(path.to_path_buf()));
    Ok(())
}

fn collect_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| PumpError::io(dir, e))? {
        let entry = entry.map_err(|e| PumpError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_files(&path, recursive, out)?;
            }
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
