//! Exact arithmetic on Kubernetes resource quantity strings.
//!
//! Memory is tracked in bytes, CPU in milli-cores, both as `i64`. Parsing
//! works on exact integers (i128 intermediates, no floats) so that values
//! like `1.5Gi` resolve precisely and `1Gi` compares equal to `1024Mi`.
//! Anything malformed or out of `i64` range yields `None`; callers fall
//! back to their defaults.

/// Upper bound on mantissa digits; keeps i128 intermediates in range.
const MAX_DIGITS: usize = 27;

/// Multiplier for a quantity suffix as a (numerator, denominator) pair.
fn suffix_multiplier(suffix: &str) -> Option<(i128, i128)> {
    let mult = match suffix {
        "" => (1, 1),
        "Ki" => (1i128 << 10, 1),
        "Mi" => (1i128 << 20, 1),
        "Gi" => (1i128 << 30, 1),
        "Ti" => (1i128 << 40, 1),
        "Pi" => (1i128 << 50, 1),
        "Ei" => (1i128 << 60, 1),
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1000),
        "k" => (1000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        _ => return None,
    };
    Some(mult)
}

/// A decimal exponent (`e3`, `E-2`, `e+6`). A bare `E` with no digits is
/// the exa suffix, not an exponent.
fn parse_exponent(suffix: &str) -> Option<i32> {
    let digits = suffix.strip_prefix(['e', 'E'])?;
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i32>().ok()
}

fn exponent_multiplier(exponent: i32) -> Option<(i128, i128)> {
    if exponent >= 0 {
        Some((10i128.checked_pow(exponent as u32)?, 1))
    } else {
        Some((1, 10i128.checked_pow(exponent.unsigned_abs())?))
    }
}

/// Parses a quantity string into `scale` units per whole quantity.
///
/// Rounds away from zero on inexact division, matching how the upstream
/// API machinery resolves fractional canonical values.
fn parse_scaled(input: &str, scale: i128) -> Option<i64> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    let (s, negative) = match s.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (s.strip_prefix('+').unwrap_or(s), false),
    };

    let number_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_end);
    // A suffix is either an SI/binary multiplier or a decimal exponent,
    // never both.
    let (mult_num, mult_den) = match parse_exponent(suffix) {
        Some(exponent) => exponent_multiplier(exponent)?,
        None => suffix_multiplier(suffix)?,
    };

    let (int_part, frac_part) = match number.split_once('.') {
        Some((int, frac)) => (int, frac),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if int_part.len() + frac_part.len() > MAX_DIGITS {
        return None;
    }
    if !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let mantissa: i128 = format!("{int_part}{frac_part}").parse().ok()?;
    let denominator = mult_den.checked_mul(10i128.checked_pow(frac_part.len() as u32)?)?;
    let numerator = mantissa.checked_mul(mult_num)?.checked_mul(scale)?;

    let magnitude = (numerator + denominator - 1) / denominator;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}

/// Parses a memory quantity (`1Gi`, `256Mi`, `1500k`, `1073741824`) to bytes.
pub fn parse_memory_bytes(s: &str) -> Option<i64> {
    parse_scaled(s, 1)
}

/// Parses a CPU quantity (`500m`, `2`, `1.5`) to milli-cores.
pub fn parse_cpu_millis(s: &str) -> Option<i64> {
    parse_scaled(s, 1000)
}

const BINARY_SUFFIXES: [(&str, i64); 6] = [
    ("Ei", 1i64 << 60),
    ("Pi", 1i64 << 50),
    ("Ti", 1i64 << 40),
    ("Gi", 1i64 << 30),
    ("Mi", 1i64 << 20),
    ("Ki", 1i64 << 10),
];

/// Renders bytes with the largest evenly-dividing binary suffix, or as
/// plain bytes when no suffix divides evenly.
pub fn format_memory(bytes: i64) -> String {
    if bytes != 0 {
        for (suffix, unit) in BINARY_SUFFIXES {
            if bytes % unit == 0 {
                return format!("{}{}", bytes / unit, suffix);
            }
        }
    }
    bytes.to_string()
}

/// Renders milli-cores as whole cores when possible, else with the `m` suffix.
pub fn format_cpu_millis(millis: i64) -> String {
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        format!("{millis}m")
    }
}

/// `value * percent / 100` with integer arithmetic, clamped to `i64`.
pub fn percent_of(value: i64, percent: u32) -> i64 {
    let scaled = value as i128 * percent as i128 / 100;
    scaled.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Divides a node-wide figure into per-pod shares. A zero count is
/// treated as one pod.
pub fn per_pod(value: i64, pods: usize) -> i64 {
    value / pods.max(1) as i64
}

/// `total - used - headroom`, clamped at zero.
pub fn remaining(total: i64, used: i64, headroom: i64) -> i64 {
    total.saturating_sub(used).saturating_sub(headroom).max(0)
}
