//! Typed cell parsers and null matching. ASCII only, no locale: an optional
//! sign followed by decimal digits for integers, IEEE-754 decimal literal
//! syntax for floats, and the `1`/`0`/`true`/`false` literals for booleans.
//! Every parser must consume the whole cell.

use std::str;

#[inline]
fn cell_str(cell: &[u8]) -> Option<&str> {
    str::from_utf8(cell).ok()
}

/// Parses a full-cell decimal `i32`, accepting a leading `+` or `-`.
#[inline]
pub fn parse_int32(cell: &[u8]) -> Option<i32> {
    cell_str(cell)?.parse().ok()
}

/// Parses a full-cell decimal `i64`, accepting a leading `+` or `-`.
#[inline]
pub fn parse_int64(cell: &[u8]) -> Option<i64> {
    cell_str(cell)?.parse().ok()
}

/// Parses a full-cell decimal float. `NaN` and infinities are rejected, as
/// are cells that only partially parse.
#[inline]
pub fn parse_float64(cell: &[u8]) -> Option<f64> {
    let value: f64 = cell_str(cell)?.parse().ok()?;

    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Parses `1`, `0`, or case-insensitive `true`/`false`.
#[inline]
pub fn parse_bool(cell: &[u8]) -> Option<bool> {
    match cell {
        b"1" => Some(true),
        b"0" => Some(false),
        _ if cell.eq_ignore_ascii_case(b"true") => Some(true),
        _ if cell.eq_ignore_ascii_case(b"false") => Some(false),
        _ => None,
    }
}

/// Exact byte equality against the configured null markers.
#[inline]
pub fn is_null(cell: &[u8], null_values: &[String]) -> bool {
    null_values.iter().any(|null| null.as_bytes() == cell)
}

/// Strips leading and trailing ASCII whitespace.
#[inline]
pub fn trim_ascii(cell: &[u8]) -> &[u8] {
    let start = cell
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(cell.len());
    let end = cell
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);

    &cell[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int32() {
        assert_eq!(parse_int32(b"0"), Some(0));
        assert_eq!(parse_int32(b"-999"), Some(-999));
        assert_eq!(parse_int32(b"+42"), Some(42));
        assert_eq!(parse_int32(b"2147483647"), Some(2147483647));
        assert_eq!(parse_int32(b"-2147483648"), Some(-2147483648));

        assert_eq!(parse_int32(b"2147483648"), None);
        assert_eq!(parse_int32(b"-2147483649"), None);
        assert_eq!(parse_int32(b""), None);
        assert_eq!(parse_int32(b"+"), None);
        assert_eq!(parse_int32(b"12x"), None);
        assert_eq!(parse_int32(b" 12"), None);
        assert_eq!(parse_int32(b"1.0"), None);
    }

    #[test]
    fn test_parse_int64() {
        assert_eq!(parse_int64(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_int64(b"-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_int64(b"9223372036854775808"), None);
        assert_eq!(parse_int64(b"17"), Some(17));
        assert_eq!(parse_int64(b"1_0"), None);
    }

    #[test]
    fn test_parse_float64() {
        assert_eq!(parse_float64(b"1.5"), Some(1.5));
        assert_eq!(parse_float64(b"-0.25"), Some(-0.25));
        assert_eq!(parse_float64(b"1e3"), Some(1000.0));
        assert_eq!(parse_float64(b"2.5E-2"), Some(0.025));
        assert_eq!(parse_float64(b"42"), Some(42.0));

        assert_eq!(parse_float64(b"NaN"), None);
        assert_eq!(parse_float64(b"inf"), None);
        assert_eq!(parse_float64(b"-Inf"), None);
        assert_eq!(parse_float64(b"1e999"), None);
        assert_eq!(parse_float64(b"1.5x"), None);
        assert_eq!(parse_float64(b""), None);
        assert_eq!(parse_float64(b" 1.5"), None);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool(b"1"), Some(true));
        assert_eq!(parse_bool(b"0"), Some(false));
        assert_eq!(parse_bool(b"true"), Some(true));
        assert_eq!(parse_bool(b"TRUE"), Some(true));
        assert_eq!(parse_bool(b"False"), Some(false));

        assert_eq!(parse_bool(b"yes"), None);
        assert_eq!(parse_bool(b"2"), None);
        assert_eq!(parse_bool(b""), None);
    }

    #[test]
    fn test_is_null() {
        let nulls = vec!["".to_string(), "null".to_string(), "NULL".to_string()];

        assert!(is_null(b"", &nulls));
        assert!(is_null(b"null", &nulls));
        assert!(is_null(b"NULL", &nulls));
        assert!(!is_null(b"Null", &nulls));
        assert!(!is_null(b"0", &nulls));
    }

    #[test]
    fn test_trim_ascii() {
        assert_eq!(trim_ascii(b"  x  "), b"x");
        assert_eq!(trim_ascii(b"\t a b \r\n"), b"a b");
        assert_eq!(trim_ascii(b"   "), b"");
        assert_eq!(trim_ascii(b""), b"");
        assert_eq!(trim_ascii(b"xy"), b"xy");
    }
}
