//! Smali literal grammar.
//!
//! String literals in smali are double-quoted and use a small, Java-like escape set:
//! `\b \t \n \f \r \' \" \\` and `\uXXXX`. Java strings are sequences of UTF-16 code
//! units that may contain unpaired surrogates, so decoded literals are carried as
//! [`JavaString`] rather than `String`.
//!
//! The escaper mirrors what baksmali emits: control characters and everything outside
//! printable ASCII become `\uXXXX` with lowercase hex digits, so the output is plain
//! ASCII regardless of the plaintext.

use widestring::U16String;

use crate::Result;

/// A Java string: UTF-16 code units, unpaired surrogates allowed.
pub type JavaString = U16String;

/// Escape UTF-16 code units into the body of a smali string literal (without quotes).
///
/// The mapping is total: every sequence of code units has an escaped form, and
/// [`unescape`] inverts it exactly.
#[must_use]
pub fn escape(units: &[u16]) -> String {
    let mut out = String::with_capacity(units.len() + 2);
    for &unit in units {
        match unit {
            0x09 => out.push_str("\\t"),
            0x0A => out.push_str("\\n"),
            0x0D => out.push_str("\\r"),
            0x22 => out.push_str("\\\""),
            0x27 => out.push_str("\\'"),
            0x5C => out.push_str("\\\\"),
            0x20..=0x7E => out.push(char::from(unit as u8)),
            _ => out.push_str(&format!("\\u{unit:04x}")),
        }
    }
    out
}

/// Decode the body of a smali string literal (without the surrounding quotes).
///
/// Raw non-ASCII characters are accepted and converted to UTF-16.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedInput`] (with line 0, callers attach the real line
/// through [`crate::Error::at_line`]) for unknown escapes, truncated `\u` escapes and
/// unescaped quotes.
pub fn unescape(body: &str) -> Result<JavaString> {
    let mut units: Vec<u16> = Vec::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let Some(escaped) = chars.next() else {
                    return Err(malformed_error!(0, "dangling backslash in string literal"));
                };
                let unit = match escaped {
                    'b' => 0x08,
                    't' => 0x09,
                    'n' => 0x0A,
                    'f' => 0x0C,
                    'r' => 0x0D,
                    '\'' => 0x27,
                    '"' => 0x22,
                    '\\' => 0x5C,
                    'u' => {
                        let mut value: u16 = 0;
                        for _ in 0..4 {
                            let digit = chars
                                .next()
                                .and_then(|d| d.to_digit(16))
                                .ok_or_else(|| malformed_error!(0, "truncated \\u escape"))?;
                            value = (value << 4) | digit as u16;
                        }
                        value
                    }
                    other => {
                        return Err(malformed_error!(0, "unknown escape sequence \\{}", other));
                    }
                };
                units.push(unit);
            }
            '"' => return Err(malformed_error!(0, "unescaped quote in string literal")),
            _ => {
                let mut buf = [0u16; 2];
                units.extend_from_slice(c.encode_utf16(&mut buf));
            }
        }
    }

    Ok(U16String::from_vec(units))
}

/// Split a quoted literal off the front of `text`.
///
/// `text` must start with `"`. Returns the decoded literal and the remainder after
/// the closing quote.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedInput`] if the literal is unterminated or its body
/// does not decode.
pub fn split_quoted(text: &str) -> Result<(JavaString, &str)> {
    let Some(body) = text.strip_prefix('"') else {
        return Err(malformed_error!(0, "expected string literal"));
    };

    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => {
                let literal = unescape(&body[..i])?;
                return Ok((literal, &body[i + 1..]));
            }
            _ => i += 1,
        }
    }

    Err(malformed_error!(0, "unterminated string literal"))
}

/// Render a complete quoted smali literal.
#[must_use]
pub fn quote(units: &[u16]) -> String {
    format!("\"{}\"", escape(units))
}

/// Parse a smali integer literal (`-0x1f`, `42`, `0x62a9d9ed799705f5L`, `0x7ft`).
///
/// Values wrap to 64 bits the way baksmali prints them: negative numbers carry an
/// explicit sign, so magnitudes never exceed `2^63`.
#[must_use]
pub fn parse_integer(token: &str) -> Option<i64> {
    let token = token.trim();
    let token = token
        .strip_suffix(['L', 'l', 't', 'T', 's', 'S'])
        .unwrap_or(token);

    let (negative, magnitude) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };

    let value = if let Some(hex) = magnitude
        .strip_prefix("0x")
        .or_else(|| magnitude.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()?
    } else {
        magnitude.parse::<u64>().ok()?
    };

    if negative {
        Some(0u64.wrapping_sub(value) as i64)
    } else {
        Some(value as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn units(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_escape_specials() {
        assert_eq!(escape(&units("a\tb\nc\rd")), "a\\tb\\nc\\rd");
        assert_eq!(escape(&units("say \"hi\"")), "say \\\"hi\\\"");
        assert_eq!(escape(&units("it's")), "it\\'s");
        assert_eq!(escape(&units("C:\\dir")), "C:\\\\dir");
    }

    #[test]
    fn test_escape_non_ascii() {
        assert_eq!(escape(&units("é")), "\\u00e9");
        assert_eq!(escape(&units("日本")), "\\u65e5\\u672c");
        assert_eq!(escape(&[0x0000, 0x001F, 0x007F]), "\\u0000\\u001f\\u007f");
        assert_eq!(escape(&[0xD83D]), "\\ud83d");
    }

    #[test]
    fn test_unescape() {
        let s = unescape("a\\tb\\u0041\\\\\\\"\\'\\b\\f").unwrap();
        assert_eq!(s.as_slice(), units("a\tbA\\\"'\u{8}\u{c}").as_slice());
    }

    #[test]
    fn test_unescape_raw_non_ascii() {
        let s = unescape("ß😀").unwrap();
        assert_eq!(s.as_slice(), &[0x00DF, 0xD83D, 0xDE00]);
    }

    #[test]
    fn test_unescape_errors() {
        assert!(unescape("abc\\").is_err());
        assert!(unescape("\\u12").is_err());
        assert!(unescape("\\uzzzz").is_err());
        assert!(unescape("\\q").is_err());
        assert!(unescape("a\"b").is_err());
    }

    #[test]
    fn test_split_quoted() {
        let (lit, rest) = split_quoted("\"a\\\"b\" # comment").unwrap();
        assert_eq!(lit.to_string_lossy(), "a\"b");
        assert_eq!(rest, " # comment");

        assert!(split_quoted("\"open").is_err());
        assert!(split_quoted("bare").is_err());
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("-0x1"), Some(-1));
        assert_eq!(parse_integer("0x7f"), Some(0x7f));
        assert_eq!(parse_integer("0x62a9d9ed799705f5L"), Some(0x62a9_d9ed_7997_05f5));
        assert_eq!(
            parse_integer("-0x34db2f5a3773ca4dL"),
            Some(0xCB24_D0A5_C88C_35B3_u64 as i64)
        );
        assert_eq!(parse_integer("-0x8000000000000000L"), Some(i64::MIN));
        assert_eq!(parse_integer("0x10t"), Some(16));
        assert_eq!(parse_integer("v0"), None);
        assert_eq!(parse_integer(""), None);
    }

    proptest! {
        #[test]
        fn escape_round_trips(raw in proptest::collection::vec(any::<u16>(), 0..64)) {
            let escaped = escape(&raw);
            prop_assert!(escaped.is_ascii());
            let back = unescape(&escaped).unwrap();
            prop_assert_eq!(back.as_slice(), raw.as_slice());
        }

        #[test]
        fn quoted_literal_splits_back(raw in proptest::collection::vec(any::<u16>(), 0..32)) {
            let text = format!("{}, tail", quote(&raw));
            let (lit, rest) = split_quoted(&text).unwrap();
            prop_assert_eq!(lit.as_slice(), raw.as_slice());
            prop_assert_eq!(rest, ", tail");
        }
    }
}
