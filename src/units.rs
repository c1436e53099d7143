//! Engineering notation
//!
//! Frequencies and rates on the command line are written as `2.4G`, `500k`
//! or plain `1e6`; status output prints them back the same way.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid number \"{0}\" (expected e.g. 2.4G, 500k, 1e6)")]
pub struct ParseEngError(pub String);

const SUFFIXES: [(char, f64); 9] = [
    ('T', 1e12),
    ('G', 1e9),
    ('M', 1e6),
    ('k', 1e3),
    ('K', 1e3),
    ('m', 1e-3),
    ('u', 1e-6),
    ('n', 1e-9),
    ('p', 1e-12),
];

/// Parse a number with an optional SI suffix.
pub fn parse_eng(text: &str) -> Result<f64, ParseEngError> {
    let trimmed = text.trim();
    let err = || ParseEngError(text.to_string());

    let (number, scale) = match trimmed.chars().last() {
        Some(c) => match SUFFIXES.iter().find(|(s, _)| *s == c) {
            Some(&(_, scale)) => (&trimmed[..trimmed.len() - c.len_utf8()], scale),
            None => (trimmed, 1.0),
        },
        None => return Err(err()),
    };

    let value: f64 = number.parse().map_err(|_| err())?;
    let value = value * scale;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(err())
    }
}

/// Format with the largest SI suffix that keeps the mantissa at or above 1.
pub fn format_eng(value: f64) -> String {
    let magnitude = value.abs();
    let (scale, suffix) = if magnitude >= 1e12 {
        (1e12, "T")
    } else if magnitude >= 1e9 {
        (1e9, "G")
    } else if magnitude >= 1e6 {
        (1e6, "M")
    } else if magnitude >= 1e3 {
        (1e3, "k")
    } else if magnitude >= 1.0 || magnitude == 0.0 {
        (1.0, "")
    } else if magnitude >= 1e-3 {
        (1e-3, "m")
    } else if magnitude >= 1e-6 {
        (1e-6, "u")
    } else if magnitude >= 1e-9 {
        (1e-9, "n")
    } else {
        (1e-12, "p")
    };

    let mantissa = format!("{:.6}", value / scale);
    let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", mantissa, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_eng("2.4G").unwrap(), 2.4e9);
        assert_eq!(parse_eng("500k").unwrap(), 500e3);
        assert_eq!(parse_eng("100M").unwrap(), 100e6);
        assert_eq!(parse_eng(" 1e6 ").unwrap(), 1e6);
        assert_eq!(parse_eng("-10").unwrap(), -10.0);
        assert!((parse_eng("250m").unwrap() - 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_eng("").is_err());
        assert!(parse_eng("G").is_err());
        assert!(parse_eng("12x").is_err());
        assert!(parse_eng("inf").is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format_eng(2.4e9), "2.4G");
        assert_eq!(format_eng(1.5625e6), "1.5625M");
        assert_eq!(format_eng(128e6), "128M");
        assert_eq!(format_eng(-20.0), "-20");
        assert_eq!(format_eng(0.0), "0");
        assert_eq!(format_eng(500e3), "500k");
    }
}
