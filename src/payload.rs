//! Hex payload parsing for stdin input

use anyhow::{bail, Context, Result};
use bytes::Bytes;

/// Decode one input line into a payload.
///
/// Whitespace between bytes and `0x` prefixes are ignored, so `0x01 0x02`,
/// `01 02` and `0102` all decode to the same two bytes. Blank lines yield
/// `None`.
pub fn parse_line(line: &str) -> Result<Option<Bytes>> {
    let mut digits = String::with_capacity(line.len());
    for token in line.split_whitespace() {
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        digits.push_str(token);
    }

    if digits.is_empty() {
        return Ok(None);
    }
    if digits.len() % 2 != 0 {
        bail!("Odd number of hex digits in {:?}", line.trim());
    }

    let bytes = hex::decode(&digits).with_context(|| format!("Invalid hex in {:?}", line.trim()))?;
    Ok(Some(Bytes::from(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_hex() {
        let payload = parse_line("deadBEEF").unwrap().unwrap();
        assert_eq!(payload.as_ref(), [0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_parse_prefixed_and_spaced() {
        let payload = parse_line("  0x01 0X02\t03  ").unwrap().unwrap();
        assert_eq!(payload.as_ref(), [0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_blank_line_is_skipped() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   \t").unwrap().is_none());
    }

    #[test]
    fn test_invalid_input_rejected() {
        assert!(parse_line("0x1").is_err());
        assert!(parse_line("zz").is_err());
        assert!(parse_line("hello world").is_err());
    }
}
