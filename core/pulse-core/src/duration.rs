//! Process-table time parsing and human-readable duration formatting.
//!
//! `ps` prints elapsed and CPU time in several shapes depending on platform
//! and magnitude:
//!
//! ```text
//! 12:34.56      MM:SS.ff   (macOS cputime; minutes may exceed 59)
//! 05:07         MM:SS      (etime under an hour)
//! 01:02:03      HH:MM:SS
//! 2-03:04:05    DD-HH:MM:SS
//! ```
//!
//! All shapes normalize to seconds.

const SECS_PER_MINUTE: f64 = 60.0;
const SECS_PER_HOUR: f64 = 3_600.0;
const SECS_PER_DAY: f64 = 86_400.0;

/// Parses a process-table time string into seconds.
///
/// Returns `None` for anything malformed; callers skip the record.
pub fn parse_ps_time(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (days, rest) = match trimmed.split_once('-') {
        Some((day_part, time_part)) => (Some(parse_whole(day_part)?), time_part),
        None => (None, trimmed),
    };

    let parts: Vec<&str> = rest.split(':').collect();
    let seconds = match parts.as_slice() {
        [minutes, seconds] if days.is_none() => {
            let minutes = parse_whole(minutes)?;
            let seconds = parse_seconds(seconds)?;
            minutes as f64 * SECS_PER_MINUTE + seconds
        }
        [hours, minutes, seconds] => {
            let hours = parse_whole(hours)?;
            let minutes = parse_whole(minutes)?;
            if minutes >= 60 {
                return None;
            }
            let seconds = parse_seconds(seconds)?;
            hours as f64 * SECS_PER_HOUR + minutes as f64 * SECS_PER_MINUTE + seconds
        }
        _ => return None,
    };

    Some(days.unwrap_or(0) as f64 * SECS_PER_DAY + seconds)
}

/// Parses a process-table time string into whole milliseconds.
pub fn parse_ps_time_ms(raw: &str) -> Option<u64> {
    parse_ps_time(raw).map(|secs| (secs * 1_000.0).round() as u64)
}

fn parse_whole(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

// Seconds field: two-digit whole part, optional fractional part.
fn parse_seconds(value: &str) -> Option<f64> {
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (value, None),
    };
    let whole = parse_whole(whole)?;
    if whole >= 60 {
        return None;
    }
    let fraction = match fraction {
        Some(digits) => {
            parse_whole(digits)?;
            format!("0.{}", digits).parse::<f64>().ok()?
        }
        None => 0.0,
    };
    Some(whole as f64 + fraction)
}

/// Formats a millisecond duration for event payloads: `42s`, `5m 03s`,
/// `1h 02m`, `2d 03h`.
pub fn format_duration(ms: u64) -> String {
    let total_secs = ms / 1_000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {:02}h", days, hours)
    } else if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
