// src/guard.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pre-write guardrails: repetition ceiling and free-disk-space checks.
//!
//! The disk guard groups targets by underlying device and requires each
//! device to hold the summed expected output plus a safety margin, then
//! re-checks per target immediately before the file is opened. Stdout
//! targets are exempt. Where free space cannot be queried the guard skips
//! silently and the job relies on the error budget instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{PumpError, Result};
use crate::targets::Target;
use crate::units::fmt_bytes;

/// Abort before opening anything when `--times` exceeds the guard.
pub fn check_max_times(times: Option<u64>, limit: u64) -> Result<()> {
    match times {
        Some(n) if n > limit => Err(PumpError::TimesGuard { requested: n, limit }),
        _ => Ok(()),
    }
}

/// Device-grouped free-space check over all targets.
pub fn check_disk_global(targets: &[Target], expected: u64, margin: u64) -> Result<()> {
    let mut groups: HashMap<u64, (PathBuf, u64)> = HashMap::new();
    for target in targets {
        let Some(path) = target.path() else { continue };
        let parent = existing_ancestor(path);
        let Some(dev) = device_id(&parent) else { continue };
        let entry = groups.entry(dev).or_insert_with(|| (parent.clone(), 0));
        entry.1 = entry.1.saturating_add(expected);
    }
    for (path, need) in groups.values() {
        check_device(path, need.saturating_add(margin))?;
    }
    Ok(())
}

/// Per-target re-check immediately before open.
pub fn check_disk_target(path: &Path, expected: u64, margin: u64) -> Result<()> {
    check_device(&existing_ancestor(path), expected.saturating_add(margin))
}

fn check_device(path: &Path, need: u64) -> Result<()> {
    let Some(free) = free_space(path) else {
        tracing::debug!(path = %path.display(), "free space unavailable, guard skipped");
        return Ok(());
    };
    if need > free {
        tracing::error!(
            path = %path.display(),
            need = %fmt_bytes(need),
            free = %fmt_bytes(free),
            "disk guard refused the job"
        );
        return Err(PumpError::DiskGuard { path: path.to_path_buf(), need, free });
    }
    Ok(())
}

/// Nearest existing ancestor of a path-to-be; the device the bytes land on.
fn existing_ancestor(path: &Path) -> PathBuf {
    let mut cur = path.parent().unwrap_or_else(|| Path::new("."));
    while !cur.exists() {
        match cur.parent() {
            Some(parent) if parent.as_os_str().is_empty() => return PathBuf::from("."),
            Some(parent) => cur = parent,
            None => break,
        }
    }
    if cur.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cur.to_path_buf()
    }
}

#[cfg(unix)]
fn device_id(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| m.dev())
}

#[cfg(not(unix))]
fn device_id(_path: &Path) -> Option<u64> {
    // No portable device identity; collapse everything into one group.
    Some(0)
}

/// Free bytes available to unprivileged writers on the filesystem at `path`.
#[cfg(unix)]
pub fn free_space(path: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let stat = unsafe { stat.assume_init() };
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
pub fn free_space(_path: &Path) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_times_guard() {
        assert!(check_max_times(None, 100).is_ok());
        assert!(check_max_times(Some(100), 100).is_ok());
        let err = check_max_times(Some(101), 100).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn free_space_reports_something() {
        let dir = tempfile::tempdir().unwrap();
        assert!(free_space(dir.path()).unwrap() > 0);
    }

    #[cfg(unix)]
    #[test]
    fn absurd_expectation_trips_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::File(dir.path().join("out.bin"));
        let err = check_disk_global(std::slice::from_ref(&target), u64::MAX / 4, 0).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn modest_expectation_passes() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::File(dir.path().join("out.bin"));
        check_disk_global(std::slice::from_ref(&target), 1024, 0).unwrap();
        check_disk_target(&dir.path().join("out.bin"), 1024, 0).unwrap();
    }

    #[test]
    fn stdout_targets_are_exempt() {
        check_disk_global(&[Target::Stdout], u64::MAX / 2, 0).unwrap();
    }

    #[test]
    fn missing_parents_walk_to_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c/out.bin");
        assert_eq!(existing_ancestor(&deep), dir.path());
    }
}
