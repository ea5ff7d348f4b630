//! Parses numeric strings with optional units of measurement into SI values.
//!
//! Values loaded from vessel descriptions are plain numbers optionally
//! followed by a unit name, e.g. `"6378.145 ft"` or `"100 C"`. The parser
//! returns the value converted into metric units. A trailing `+` or `-`
//! immediately after the number nudges the value by a relative epsilon,
//! which is used to bias table lookups to one side of a breakpoint.

use thiserror::Error;

/// Relative nudge applied by a trailing `+`/`-` sign.
const EPS: f64 = 1e-15;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitsError {
    #[error("no numeric value at start of '{0}'")]
    NoValue(String),
    #[error("trailing input '{0}' could not be parsed as a unit")]
    TrailingInput(String),
}

/// Unit conversion: `si = value * scale + offset`.
struct Unit {
    name: &'static str,
    scale: f64,
    offset: f64,
}

const UNITS_TABLE: &[Unit] = &[
    // SI units
    Unit { name: "m", scale: 1.0, offset: 0.0 },
    Unit { name: "kg", scale: 1.0, offset: 0.0 },
    Unit { name: "K", scale: 1.0, offset: 0.0 },
    Unit { name: "W", scale: 1.0, offset: 0.0 },
    // Common metric units
    Unit { name: "C", scale: 1.0, offset: 273.15 },
    // Imperial/british units
    Unit { name: "ft", scale: 0.3048, offset: 0.0 },
    Unit { name: "lb", scale: 0.453592, offset: 0.0 },
    Unit { name: "lbs", scale: 0.453592, offset: 0.0 },
    Unit { name: "R", scale: 5.0 / 9.0, offset: 0.0 },
    Unit { name: "btu", scale: 1054.35026444, offset: 0.0 },
    // Compound units
    Unit { name: "kg/m3", scale: 1.0, offset: 0.0 },
    Unit { name: "lb/ft3", scale: 16.0184634, offset: 0.0 },
    Unit {
        name: "btu/(lb R)",
        scale: 1054.35026444 / (0.45359237 * 5.0 / 9.0),
        offset: 0.0,
    },
    Unit {
        name: "btu/(ft s R)",
        scale: 1054.35026444 / (0.3048 * 5.0 / 9.0),
        offset: 0.0,
    },
];

/// Length of the longest prefix of `s` that parses as a float literal.
fn float_prefix_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut seen_digit = false;

    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        seen_digit = true;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            seen_digit = true;
        }
    }
    if !seen_digit {
        return 0;
    }
    // Optional exponent, only consumed if well formed
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    i
}

/// Parses a number with an optional unit, returning the SI value and the
/// unconsumed remainder of the input.
pub fn string_to_real_partial(input: &str) -> Result<(f64, &str), UnitsError> {
    let s = input.trim_start_matches(' ');
    let len = float_prefix_len(s);
    if len == 0 {
        return Err(UnitsError::NoValue(input.to_string()));
    }
    // Safe to unwrap: the prefix was validated as a float literal
    let mut value: f64 = s[..len].parse().unwrap();
    let mut rest = &s[len..];

    // Epsilon nudge for biasing values off exact breakpoints
    if let Some(stripped) = rest.strip_prefix('+') {
        value += value * EPS;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('-') {
        value -= value * EPS;
        rest = stripped;
    }

    rest = rest.trim_start_matches(' ');
    for unit in UNITS_TABLE {
        if rest == unit.name {
            value = value * unit.scale + unit.offset;
            rest = &rest[unit.name.len()..];
            break;
        }
    }

    Ok((value, rest))
}

/// Parses an entire string as a number with an optional unit.
///
/// Returns an error when any unparsed text remains after the value and unit.
pub fn string_to_real(input: &str) -> Result<f64, UnitsError> {
    let (value, rest) = string_to_real_partial(input)?;
    if !rest.is_empty() {
        return Err(UnitsError::TrailingInput(rest.to_string()));
    }
    Ok(value)
}
