// src/units.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-friendly size and count parsing, plus progress formatting.
//!
//! Sizes accept decimal (KB/MB/GB/TB) and binary (KiB/MiB/GiB/TiB) units.
//! Counts accept plain integers, underscores, scientific notation (`1e6`),
//! and caret powers (`2^20`).

use crate::error::{PumpError, Result};

/// Parse a human size string like `64KiB`, `10MB`, or `1024` into bytes.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err(PumpError::Config("empty size".into()));
    }
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| PumpError::Config(format!("invalid size: {s}")))?;
    let mult: u64 = match unit.trim() {
        "" | "b" | "byte" | "bytes" => 1,
        "kb" => 1000,
        "mb" => 1000_u64.pow(2),
        "gb" => 1000_u64.pow(3),
        "tb" => 1000_u64.pow(4),
        "kib" => 1024,
        "mib" => 1024_u64.pow(2),
        "gib" => 1024_u64.pow(3),
        "tib" => 1024_u64.pow(4),
        other => return Err(PumpError::Config(format!("invalid unit in size: {other}"))),
    };
    Ok((value * mult as f64) as u64)
}

/// Parse a count expression: `1000000`, `1_000_000`, `1e6`, or `2^20`.
/// Fractional results are truncated toward zero.
pub fn parse_count(expr: &str) -> Result<u64> {
    let s = expr.trim().to_ascii_lowercase().replace('_', "");
    if let Some((base, exp)) = s.split_once('^') {
        let b: f64 = base
            .parse()
            .map_err(|_| PumpError::Config(format!("invalid power expression: {expr}")))?;
        let e: f64 = exp
            .parse()
            .map_err(|_| PumpError::Config(format!("invalid power expression: {expr}")))?;
        let v = (b as u64)
            .checked_pow(e as u32)
            .ok_or_else(|| PumpError::Config(format!("power expression overflows: {expr}")))?;
        return Ok(v);
    }
    if s.contains('e') {
        let v: f64 = s
            .parse()
            .map_err(|_| PumpError::Config(format!("invalid scientific notation: {expr}")))?;
        return Ok(v as u64);
    }
    s.parse()
        .map_err(|_| PumpError::Config(format!("invalid integer: {expr}")))
}

/// Parse a `MIN,MAX` times range into truncated integer bounds.
pub fn parse_count_range(expr: &str) -> Result<(u64, u64)> {
    let (lo, hi) = expr
        .split_once(',')
        .ok_or_else(|| PumpError::Config("--times-range must be MIN,MAX".into()))?;
    let (lo, hi) = (parse_count(lo)?, parse_count(hi)?);
    if hi < lo {
        return Err(PumpError::Config(format!("invalid --times-range bounds: {expr}")));
    }
    Ok((lo, hi))
}

/// Format a byte count with binary units, e.g. `64.0 KiB`.
pub fn fmt_bytes(n: u64) -> String {
    const STEPS: [(&str, u64); 4] = [
        ("B", 1),
        ("KiB", 1024),
        ("MiB", 1024 * 1024),
        ("GiB", 1024 * 1024 * 1024),
    ];
    for (unit, step) in STEPS {
        if n < step * 1024 || unit == "GiB" {
            return format!("{:.1} {}", n as f64 / step as f64, unit);
        }
    }
    format!("{n} B")
}

/// Format an ETA in `MM:SS` or `HH:MM:SS`; `--:--` when unknown.
pub fn fmt_eta(seconds: f64) -> String {
    if seconds <= 0.0 || !seconds.is_finite() {
        return "--:--".into();
    }
    let total = seconds as u64;
    let (h, rem) = (total / 3600, total % 3600);
    let (m, s) = (rem / 60, rem % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
