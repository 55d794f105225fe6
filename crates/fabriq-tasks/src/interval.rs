//! Interval strings such as `"500ms"`, `"30s"` or `"1h30m"`.

use std::time::Duration;

use crate::error::{TaskError, TaskResult};

const UNITS: &[(&str, u64)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 3_600 * 1_000_000_000),
];

/// Parses a sequence of decimal numbers, each with a unit suffix.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. Fractions
/// are allowed (`"1.5h"`). The result must be positive.
///
/// # Errors
///
/// Returns [`TaskError::InvalidInterval`] for malformed input, a missing
/// unit, or a zero duration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fabriq_tasks::parse_interval;
///
/// assert_eq!(parse_interval("1h30m").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_interval("250ms").unwrap(), Duration::from_millis(250));
/// assert!(parse_interval("10").is_err());
/// ```
pub fn parse_interval(input: &str) -> TaskResult<Duration> {
    let invalid = |reason: &str| TaskError::invalid_interval(input, reason);

    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid("empty"));
    }

    let mut total_nanos: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(invalid("expected a number"));
        }

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        if unit.is_empty() {
            return Err(invalid("missing unit"));
        }

        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| invalid(&format!("unknown unit {unit:?}")))?;

        total_nanos = total_nanos
            .checked_add(scaled(number, scale).ok_or_else(|| invalid("malformed number"))?)
            .ok_or_else(|| invalid("overflow"))?;
        rest = next;
    }

    if total_nanos == 0 {
        return Err(invalid("must be positive"));
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000).map_err(|_| invalid("overflow"))?;
    let nanos = u32::try_from(total_nanos % 1_000_000_000).map_err(|_| invalid("overflow"))?;
    Ok(Duration::new(secs, nanos))
}

/// `number * scale` in nanoseconds, keeping fractional digits exact down to
/// one nanosecond.
fn scaled(number: &str, scale: u64) -> Option<u128> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if fraction.contains('.') {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(u128::from(scale))?;

    let mut unit = u128::from(scale);
    for digit in fraction.chars() {
        unit /= 10;
        if unit == 0 {
            break;
        }
        nanos = nanos.checked_add(u128::from(digit.to_digit(10)?) * unit)?;
    }
    Some(nanos)
}
