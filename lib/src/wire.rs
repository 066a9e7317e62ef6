// Copyright 2020 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared MIME-ish header framing and CSV quoting used by every on-disk and
//! on-wire record: the HEAD pointer, commit objects, tree objects, and the
//! log.
//!
//! A record is a block of `Key: Value` header lines, a blank line, then a
//! body. This module only knows about that shape; it has no idea whether
//! the body is a commit message, a tree's CSV rows, or a hex hash.

use chrono::DateTime;
use chrono::Utc;

/// Renders `headers` as `Key: Value\n` lines followed by the blank line that
/// separates them from `body`.
pub fn render_block(headers: &[(&str, &str)], body: &str) -> String {
    let mut out = String::new();
    for (key, value) in headers {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(body);
    out
}

#[derive(Debug, thiserror::Error)]
#[error("malformed MIME-ish header block: missing blank line separating headers from body")]
pub struct MissingBodySeparator;

/// Splits `text` into its ordered header lines and the body that follows the
/// first blank line.
pub fn parse_block(text: &str) -> Result<(Vec<(&str, &str)>, &str), MissingBodySeparator> {
    let (header_text, body) = text.split_once("\n\n").ok_or(MissingBodySeparator)?;
    let mut headers = Vec::new();
    for line in header_text.lines() {
        if let Some((key, value)) = line.split_once(": ") {
            headers.push((key, value));
        }
    }
    Ok((headers, body))
}

pub fn header_value<'a>(headers: &[(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, value)| *value)
}

/// Renders an RFC 1123 ("HTTP-date") timestamp in UTC, e.g.
/// `Tue, 15 Nov 1994 08:12:31 GMT`.
pub fn format_rfc1123(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an RFC 1123 timestamp rendered by [`format_rfc1123`].
pub fn parse_rfc1123(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(&s.replace("GMT", "+0000"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Quotes a CSV field, doubling embedded quotes, so tree entry names are
/// always round-trippable even if they contain a comma or quote.
pub fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

#[derive(Debug, thiserror::Error)]
pub enum CsvRowError {
    #[error("malformed CSV row: unterminated quoted field")]
    UnterminatedQuote,
    #[error("malformed CSV row: expected ',' after closing quote, found {0:?}")]
    TrailingCharacter(char),
}

/// Parses one CSV row (RFC 4180-style quoting, `,` separator). Unquoted
/// fields may not contain `,` or `"`.
pub fn csv_fields(line: &str) -> Result<Vec<String>, CsvRowError> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                            field.push('"');
                        } else {
                            break;
                        }
                    }
                    Some(c) => field.push(c),
                    None => return Err(CsvRowError::UnterminatedQuote),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                field.push(c);
                chars.next();
            }
        }
        fields.push(field);
        match chars.next() {
            Some(',') => continue,
            Some(c) => return Err(CsvRowError::TrailingCharacter(c)),
            None => break,
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_roundtrip() {
        let rendered = render_block(&[("Content-Type", "text/plain"), ("Wild-Tree", "abc")], "hi");
        let (headers, body) = parse_block(&rendered).unwrap();
        assert_eq!(header_value(&headers, "Content-Type"), Some("text/plain"));
        assert_eq!(header_value(&headers, "Wild-Tree"), Some("abc"));
        assert_eq!(body, "hi");
    }

    #[test]
    fn test_csv_quote_roundtrip() {
        let quoted = csv_quote(r#"a "quoted" name, with comma"#);
        let line = format!("h,m,{quoted}");
        let fields = csv_fields(&line).unwrap();
        assert_eq!(fields, vec!["h", "m", r#"a "quoted" name, with comma"#]);
    }

    #[test]
    fn test_csv_fields_rejects_unterminated_quote() {
        assert!(matches!(
            csv_fields(r#"a,"b"#),
            Err(CsvRowError::UnterminatedQuote)
        ));
    }

    #[test]
    fn test_csv_fields_rejects_trailing_character_after_quote() {
        assert!(matches!(
            csv_fields(r#""x"y"#),
            Err(CsvRowError::TrailingCharacter('y'))
        ));
    }

    #[test]
    fn test_rfc1123_roundtrip() {
        let now = Utc::now();
        let truncated = now - chrono::Duration::nanoseconds(now.timestamp_subsec_nanos() as i64);
        let rendered = format_rfc1123(now);
        assert_eq!(parse_rfc1123(&rendered).unwrap(), truncated);
    }
}
