//! Parsers for environment override values.
//!
//! Accepted syntax mirrors what operators already type into deployment
//! manifests: `true`/`1`/`F`-style booleans and compound durations such as
//! `300ms`, `1.5h` or `2h45m`.

use std::time::Duration;

const UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("μs", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60 * 1_000_000_000),
    ("h", 60 * 60 * 1_000_000_000),
];

/// Fraction digits beyond this are ignored (sub-nanosecond anyway).
const MAX_FRACTION_DIGITS: usize = 18;

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_u32(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

/// Parses a non-negative compound duration (`1h30m`, `250ms`, `0`).
pub(crate) fn parse_duration(raw: &str) -> Option<Duration> {
    let s = raw.trim();
    if s == "0" || s == "+0" {
        return Some(Duration::ZERO);
    }
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest.is_empty() {
        return None;
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_num) = match after_int.strip_prefix('.') {
            Some(tail) => {
                let frac_len = tail.find(|c: char| !c.is_ascii_digit()).unwrap_or(tail.len());
                tail.split_at(frac_len)
            }
            None => ("", after_int),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }

        let (unit, scale) = UNITS
            .iter()
            .filter(|(unit, _)| after_num.starts_with(*unit))
            .max_by_key(|(unit, _)| unit.len())?;
        rest = &after_num[unit.len()..];

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };
        let mut value = whole.checked_mul(*scale)?;

        let frac_digits = &frac_part[..frac_part.len().min(MAX_FRACTION_DIGITS)];
        if !frac_digits.is_empty() {
            let frac: u128 = frac_digits.parse().ok()?;
            let denom = 10u128.pow(frac_digits.len() as u32);
            value = value.checked_add(frac.checked_mul(*scale)? / denom)?;
        }

        total = total.checked_add(value)?;
    }

    let secs = u64::try_from(total / 1_000_000_000).ok()?;
    let nanos = (total % 1_000_000_000) as u32;
    Some(Duration::new(secs, nanos))
}
