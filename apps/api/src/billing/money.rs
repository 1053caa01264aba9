//! Conversions between decimal major-unit strings and minor units.

/// Parses a decimal amount in major units ("1000", "1000.5", "1000.00") into
/// minor units. More than two fractional digits are accepted only when the
/// extra digits are zero. Negative or malformed input yields `None`.
pub fn parse_minor_units(value: &str) -> Option<i64> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if fraction.len() > 2 && fraction[2..].bytes().any(|b| b != b'0') {
        return None;
    }

    let whole: i64 = whole.parse().ok()?;
    let cents = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction[..2].parse::<i64>().ok()?,
    };
    whole.checked_mul(100)?.checked_add(cents)
}

/// Formats minor units as a major-unit string with two decimals.
pub fn format_major_units(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
