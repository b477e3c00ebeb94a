//! Utility functions and helpers

pub mod time;

use anyhow::Result;

/// Parse a duration string (e.g., "500us", "1ms", "30s", "5m", "0.25s")
pub fn parse_duration(s: &str) -> Result<std::time::Duration> {
    let s = s.trim();

    let (num_str, scale_ns): (&str, u64) = if let Some(n) = s.strip_suffix("us") {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix("ms") {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000_000_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60 * 1_000_000_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600 * 1_000_000_000)
    } else {
        // Default to seconds if no suffix
        (s, 1_000_000_000)
    };
    let num_str = num_str.trim();

    if let Ok(whole) = num_str.parse::<u64>() {
        let nanos = whole
            .checked_mul(scale_ns)
            .ok_or_else(|| anyhow::anyhow!("Duration too large: {}", s))?;
        return Ok(std::time::Duration::from_nanos(nanos));
    }

    let value: f64 = num_str.parse()?;
    if !value.is_finite() || value < 0.0 {
        anyhow::bail!("Invalid duration: {}", s);
    }
    Ok(std::time::Duration::from_secs_f64(value * scale_ns as f64 / 1e9))
}
