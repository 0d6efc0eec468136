//! Wire codec for measurement entries.
//!
//! One entry renders to one line of text:
//!
//! ```text
//! measurement[,tag=value]... field=value[,field=value]... [timestamp]
//! ```
//!
//! Escaping is positional. Measurement names escape `,` and space; tag keys,
//! tag values, and field keys additionally escape `=`; string field values
//! are double-quoted with `"` and `\` escaped. Field values carry their type
//! on the wire: floats in natural decimal form, integers with an `i` suffix,
//! unsigned integers with a `u` suffix, booleans as `true`/`false`.
//!
//! [`parse_line`] is the codec's inverse: for any entry that passes
//! [`Point::validate`], parsing its rendered line yields an equal entry.

use std::borrow::Cow;
use std::iter::Peekable;
use std::str::Chars;

use chrono::{DateTime, Utc};

use crate::error::{DownlinkError, EncodingError, Result};
use crate::point::{FieldValue, Point, Precision, Timestamp};

/// Characters escaped in measurement names.
const MEASUREMENT_SPECIALS: &[char] = &[',', ' '];

/// Characters escaped in tag keys, tag values, and field keys.
const KEY_SPECIALS: &[char] = &[',', '=', ' '];

/// Renders an entry as one line of wire text.
///
/// With `precision` set, the timestamp becomes an integer count of units at
/// that precision (the form the write endpoint expects). Without it, the
/// timestamp keeps its natural form: bare nanoseconds or RFC 3339 text.
///
/// # Errors
///
/// Returns an [`EncodingError`] if the entry fails [`Point::validate`] or the
/// timestamp cannot be represented at the requested precision.
pub(crate) fn render(point: &Point, precision: Option<Precision>) -> Result<String> {
    point.validate()?;

    let mut line = String::with_capacity(64);
    line.push_str(&escape(point.measurement(), MEASUREMENT_SPECIALS));

    for (key, value) in point.tags() {
        line.push(',');
        line.push_str(&escape(key, KEY_SPECIALS));
        line.push('=');
        line.push_str(&escape(value, KEY_SPECIALS));
    }

    line.push(' ');
    for (i, (key, value)) in point.fields().iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape(key, KEY_SPECIALS));
        line.push('=');
        render_field_value(&mut line, value);
    }

    if let Some(ts) = point.time() {
        line.push(' ');
        match precision {
            Some(p) => line.push_str(&ts.as_unix(p)?.to_string()),
            None => line.push_str(&ts.render()),
        }
    }

    Ok(line)
}

/// Parses one line of wire text back into an entry.
///
/// Accepts both timestamp forms a rendered line can carry: a bare integer
/// (taken as nanoseconds) or RFC 3339 text. The parsed entry is validated, so
/// a line that parses structurally but violates entry rules (an empty tag
/// value, say) is still rejected.
///
/// # Errors
///
/// Returns [`EncodingError::Parse`] for malformed text and other
/// [`EncodingError`] variants when the parsed entry fails validation.
pub fn parse_line(text: &str) -> Result<Point> {
    let text = text.strip_suffix('\r').unwrap_or(text);
    let mut chars = text.chars().peekable();

    let measurement = scan_component(&mut chars, &[',', ' ']);
    if measurement.is_empty() {
        return Err(parse_err("missing measurement name"));
    }
    let mut point = Point::new(measurement);

    // Tags run until the first unescaped space.
    while chars.peek() == Some(&',') {
        chars.next();
        let key = scan_component(&mut chars, &['=', ',', ' ']);
        if chars.next() != Some('=') {
            return Err(parse_err(format!("tag '{key}' has no value")));
        }
        let value = scan_component(&mut chars, &[',', ' ']);
        point = point.tag(key, value);
    }

    if chars.peek() != Some(&' ') {
        return Err(parse_err("entry has no fields"));
    }
    skip_spaces(&mut chars);

    loop {
        let key = scan_component(&mut chars, &['=', ',', ' ']);
        if key.is_empty() {
            return Err(parse_err("empty field key"));
        }
        if chars.next() != Some('=') {
            return Err(parse_err(format!("field '{key}' has no value")));
        }
        let value = scan_field_value(&mut chars)?;
        point = point.field(key, value);

        match chars.peek() {
            Some(',') => {
                chars.next();
            }
            Some(' ') | None => break,
            Some(c) => {
                return Err(parse_err(format!("unexpected character {c:?} after field value")));
            }
        }
    }

    skip_spaces(&mut chars);
    let rest: String = chars.collect();
    let token = rest.trim();
    if !token.is_empty() {
        if token.contains(' ') {
            return Err(parse_err("unexpected text after timestamp"));
        }
        point = point.timestamp(parse_timestamp_token(token)?);
    }

    point.validate()?;
    Ok(point)
}

/// Escapes the given special characters with a backslash.
fn escape<'a>(s: &'a str, specials: &[char]) -> Cow<'a, str> {
    if !s.contains(specials) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    Cow::Owned(out)
}

fn render_field_value(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Float(v) => out.push_str(&format_float(*v)),
        FieldValue::Integer(v) => {
            out.push_str(&v.to_string());
            out.push('i');
        }
        FieldValue::UInteger(v) => {
            out.push_str(&v.to_string());
            out.push('u');
        }
        FieldValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        FieldValue::String(s) => {
            out.push('"');
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
    }
}

/// Formats a float so whole values stay visibly typed: 1.0 renders as "1.0",
/// not "1", which the store would read as a float anyway but humans would not.
fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// Scans up to (not including) the first unescaped terminator, unescaping as
/// it goes. A backslash before any special character drops the backslash;
/// before anything else both characters pass through.
fn scan_component(chars: &mut Peekable<Chars<'_>>, terminators: &[char]) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if c == '\\' {
            chars.next();
            match chars.peek().copied() {
                Some(next) if matches!(next, ',' | '=' | ' ') => {
                    out.push(next);
                    chars.next();
                }
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                }
                None => out.push('\\'),
            }
        } else if terminators.contains(&c) {
            break;
        } else {
            out.push(c);
            chars.next();
        }
    }
    out
}

fn skip_spaces(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek() == Some(&' ') {
        chars.next();
    }
}

fn scan_field_value(chars: &mut Peekable<Chars<'_>>) -> Result<FieldValue> {
    if chars.peek() == Some(&'"') {
        chars.next();
        let mut out = String::new();
        loop {
            match chars.next() {
                Some('\\') => match chars.next() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => return Err(parse_err("unterminated string field")),
                },
                Some('"') => return Ok(FieldValue::String(out)),
                Some(c) => out.push(c),
                None => return Err(parse_err("unterminated string field")),
            }
        }
    }

    let mut token = String::new();
    while let Some(&c) = chars.peek() {
        if c == ',' || c == ' ' {
            break;
        }
        token.push(c);
        chars.next();
    }
    classify_bare_value(&token)
}

fn classify_bare_value(token: &str) -> Result<FieldValue> {
    if token.is_empty() {
        return Err(parse_err("empty field value"));
    }

    match token {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }

    if let Some(digits) = token.strip_suffix('i') {
        let v = digits
            .parse::<i64>()
            .map_err(|e| parse_err(format!("bad integer field {token:?}: {e}")))?;
        return Ok(FieldValue::Integer(v));
    }

    if let Some(digits) = token.strip_suffix('u') {
        let v = digits
            .parse::<u64>()
            .map_err(|e| parse_err(format!("bad unsigned field {token:?}: {e}")))?;
        return Ok(FieldValue::UInteger(v));
    }

    let v = token
        .parse::<f64>()
        .map_err(|_| parse_err(format!("unrecognized field value {token:?}")))?;
    if !v.is_finite() {
        // "nan" and "inf" parse as floats but the store rejects them.
        return Err(parse_err(format!("non-finite field value {token:?}")));
    }
    Ok(FieldValue::Float(v))
}

fn parse_timestamp_token(token: &str) -> Result<Timestamp> {
    parse_timestamp_text(token)
        .map_err(|reason| parse_err(format!("cannot parse timestamp {token:?}: {reason}")))
}

/// Parses timestamp text in either wire form: a bare integer taken as
/// nanoseconds, or RFC 3339. Shared with the CSV source, which meets the same
/// two forms in time columns.
pub(crate) fn parse_timestamp_text(token: &str) -> std::result::Result<Timestamp, String> {
    let integral = match token.strip_prefix('-') {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
        None => token.chars().all(|c| c.is_ascii_digit()),
    };
    if integral {
        return token
            .parse::<i64>()
            .map(Timestamp::Nanos)
            .map_err(|e| format!("integer out of range: {e}"));
    }

    DateTime::parse_from_rfc3339(token)
        .map(|dt| Timestamp::Rfc3339(dt.with_timezone(&Utc)))
        .map_err(|e| e.to_string())
}

fn parse_err(reason: impl Into<String>) -> DownlinkError {
    EncodingError::Parse {
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_basic() {
        let point = Point::new("mem")
            .tag("host", "host1")
            .field("used_percent", 23.43234543)
            .timestamp(Timestamp::Nanos(1_621_946_700_000_000_000));

        assert_eq!(
            point.to_line().unwrap(),
            "mem,host=host1 used_percent=23.43234543 1621946700000000000"
        );
    }

    #[test]
    fn test_render_without_timestamp() {
        let point = Point::new("mem").field("used_percent", 23.5);
        assert_eq!(point.to_line().unwrap(), "mem used_percent=23.5");
    }

    #[test]
    fn test_render_rfc3339_timestamp_verbatim() {
        let dt = "2021-05-26T12:45:00Z".parse::<DateTime<Utc>>().unwrap();
        let point = Point::new("m").field("v", 1.0).timestamp(Timestamp::Rfc3339(dt));
        assert_eq!(point.to_line().unwrap(), "m v=1.0 2021-05-26T12:45:00Z");
    }

    #[test]
    fn test_render_with_precision_converts() {
        let dt = "2021-05-26T12:45:00Z".parse::<DateTime<Utc>>().unwrap();
        let point = Point::new("m").field("v", 1.0).timestamp(Timestamp::Rfc3339(dt));
        assert_eq!(
            point.to_line_with_precision(Precision::Seconds).unwrap(),
            "m v=1.0 1622033100"
        );
        assert_eq!(
            point.to_line_with_precision(Precision::Nanoseconds).unwrap(),
            "m v=1.0 1622033100000000000"
        );
    }

    #[test]
    fn test_render_escapes_specials() {
        let point = Point::new("disk usage")
            .tag("mount point", "/var/log, main")
            .field("free gb", 12.0);

        assert_eq!(
            point.to_line().unwrap(),
            "disk\\ usage,mount\\ point=/var/log\\,\\ main free\\ gb=12.0"
        );
    }

    #[test]
    fn test_render_field_types() {
        let point = Point::new("m")
            .field("f", 1.5)
            .field("i", -42i64)
            .field("u", 42u64)
            .field("b", true)
            .field("s", "plain");

        assert_eq!(point.to_line().unwrap(), "m f=1.5,i=-42i,u=42u,b=true,s=\"plain\"");
    }

    #[test]
    fn test_render_string_escapes() {
        let point = Point::new("m").field("s", r#"say "hi" \ bye"#);
        assert_eq!(point.to_line().unwrap(), r#"m s="say \"hi\" \\ bye""#);
    }

    #[test]
    fn test_format_float_whole_keeps_decimal() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(-3.0), "-3.0");
        assert_eq!(format_float(23.43234543), "23.43234543");
        assert_eq!(format_float(0.000000001), "0.000000001");
    }

    #[test]
    fn test_parse_basic() {
        let point = parse_line("mem,host=host1 used_percent=23.43234543 1621946700000000000").unwrap();
        assert_eq!(point.measurement(), "mem");
        assert_eq!(point.tags(), [("host".to_string(), "host1".to_string())]);
        assert_eq!(
            point.fields(),
            [("used_percent".to_string(), FieldValue::Float(23.43234543))]
        );
        assert_eq!(point.time(), Some(&Timestamp::Nanos(1_621_946_700_000_000_000)));
    }

    #[test]
    fn test_parse_rfc3339_timestamp() {
        let point = parse_line("m v=1.0 2021-05-26T12:45:00Z").unwrap();
        let dt = "2021-05-26T12:45:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(point.time(), Some(&Timestamp::Rfc3339(dt)));
    }

    #[test]
    fn test_parse_typed_fields() {
        let point = parse_line("m f=1.5,i=-42i,u=42u,b=T,s=\"x\"").unwrap();
        assert_eq!(
            point.fields(),
            [
                ("f".to_string(), FieldValue::Float(1.5)),
                ("i".to_string(), FieldValue::Integer(-42)),
                ("u".to_string(), FieldValue::UInteger(42)),
                ("b".to_string(), FieldValue::Boolean(true)),
                ("s".to_string(), FieldValue::String("x".to_string())),
            ]
        );
    }

    #[test]
    fn test_parse_bare_integer_is_float() {
        // Without an `i` suffix the wire type is float.
        let point = parse_line("m v=5").unwrap();
        assert_eq!(point.fields(), [("v".to_string(), FieldValue::Float(5.0))]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_line("").is_err());
        assert!(parse_line("m").is_err());
        assert!(parse_line("m,host=h").is_err());
        assert!(parse_line("m v=").is_err());
        assert!(parse_line("m v=1.0 123 456").is_err());
        assert!(parse_line("m v=\"open").is_err());
        assert!(parse_line("m v=purple").is_err());
        assert!(parse_line("m v=1.0 yesterday").is_err());
    }

    #[test]
    fn test_parse_rejects_non_finite() {
        assert!(parse_line("m v=NaN").is_err());
        assert!(parse_line("m v=inf").is_err());
    }

    #[test]
    fn test_round_trip_escaped() {
        let original = Point::new("disk usage")
            .tag("mount point", "/var, main")
            .tag("host", "a=b")
            .field("free gb", 12.5)
            .field("note", r#"quote " and slash \"#)
            .timestamp(Timestamp::Nanos(1_700_000_000_000_000_000));

        let line = original.to_line().unwrap();
        let parsed = parse_line(&line).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_round_trip_without_timestamp() {
        let original = Point::new("m").field("v", -0.5).field("ok", false);
        let parsed = parse_line(&original.to_line().unwrap()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_round_trip_rfc3339() {
        let dt = "2021-05-26T12:45:00.5Z".parse::<DateTime<Utc>>().unwrap();
        let original = Point::new("m").field("v", 1.0).timestamp(Timestamp::Rfc3339(dt));
        let parsed = parse_line(&original.to_line().unwrap()).unwrap();
        // Sub-second digits render padded but the instant survives.
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_preserves_interior_backslash() {
        let original = Point::new("m").tag("path", r"C:\data").field("v", 1.0);
        let line = original.to_line().unwrap();
        assert_eq!(line, r"m,path=C:\data v=1.0");
        assert_eq!(parse_line(&line).unwrap(), original);
    }
}
