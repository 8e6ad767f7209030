//! Parser for the syslog metrics stream pushed by Prusa printers.
//!
//! Each datagram is an RFC 5424 syslog message. Its MSG part starts with an
//! optional `msg=<n>,tm=<t>,v=<ver>` header followed by one measurement per
//! line in line-protocol form:
//!
//! ```text
//! <134>1 - 10:9c:70:27:4b:3b buddy - - - msg=51,tm=81234567,v=4 temp_noz v=214.8 -12
//! fan,fan=print rpm=5400i,pwm=255i -8
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Reasons a datagram is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("not a syslog message")]
    Envelope,
    #[error("invalid metrics header: {0}")]
    Header(String),
    #[error("line {line}: {reason}")]
    Line { line: usize, reason: String },
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    /// Syslog priority value.
    pub priority: u8,
    /// HOSTNAME field; printers put their MAC address here.
    pub hostname: Option<String>,
    /// APP-NAME field.
    pub app_name: Option<String>,
    /// Metrics header, if present.
    pub header: Option<MetricsHeader>,
    /// Measurements in arrival order.
    pub lines: Vec<MetricLine>,
}

/// Header preceding the measurements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsHeader {
    /// Sequence number of the message.
    pub message_id: u64,
    /// Device clock (time since boot) the offsets are relative to.
    pub timestamp: u64,
    /// Format version.
    pub version: u32,
}

/// One line-protocol measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricLine {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, FieldValue)>,
    /// Offset relative to the header timestamp.
    pub offset: Option<i64>,
}

/// Typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Unsigned(u64),
    Boolean(bool),
    Text(String),
}

impl FieldValue {
    /// Numeric value, `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Unsigned(v) => Some(*v as f64),
            FieldValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            FieldValue::Text(_) => None,
        }
    }
}

// RFC 5424: <PRI>VERSION TIMESTAMP HOSTNAME APP-NAME PROCID MSGID STRUCTURED-DATA MSG
static ENVELOPE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^<(\d{1,3})>(\d{1,2}) (\S+) (\S+) (\S+) (\S+) (\S+) (-|(?:\[[^\]]*\])+) ?(.*)$")
        .unwrap()
});

/// Parse a complete datagram.
pub fn parse(text: &str) -> Result<Datagram, DecodeError> {
    let caps = ENVELOPE_REGEX
        .captures(text.trim_end_matches(['\0', '\n', '\r']))
        .ok_or(DecodeError::Envelope)?;

    let priority: u8 = caps[1].parse().map_err(|_| DecodeError::Envelope)?;
    let hostname = nil_value(&caps[4]);
    let app_name = nil_value(&caps[5]);
    let body = caps.get(9).map_or("", |m| m.as_str());

    let (header, lines) = parse_body(body)?;

    Ok(Datagram {
        priority,
        hostname,
        app_name,
        header,
        lines,
    })
}

fn nil_value(s: &str) -> Option<String> {
    if s == "-" { None } else { Some(s.to_string()) }
}

/// Parse the MSG part into header and measurements.
pub fn parse_body(body: &str) -> Result<(Option<MetricsHeader>, Vec<MetricLine>), DecodeError> {
    let mut header = None;
    let mut lines = Vec::new();

    for (index, raw) in body.split('\n').enumerate() {
        let mut line = raw.trim_end_matches('\r').trim();

        if index == 0 && line.starts_with("msg=") {
            let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
            header = Some(parse_header(head)?);
            line = rest.trim();
        }

        if line.is_empty() {
            continue;
        }

        let metric = parse_line(line).map_err(|reason| DecodeError::Line {
            line: index + 1,
            reason,
        })?;
        lines.push(metric);
    }

    Ok((header, lines))
}

fn parse_header(head: &str) -> Result<MetricsHeader, DecodeError> {
    let mut header = MetricsHeader::default();

    for pair in head.split(',') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| DecodeError::Header(pair.to_string()))?;
        let invalid = || DecodeError::Header(pair.to_string());
        match key {
            "msg" => header.message_id = value.parse().map_err(|_| invalid())?,
            "tm" => header.timestamp = value.parse().map_err(|_| invalid())?,
            "v" => header.version = value.parse().map_err(|_| invalid())?,
            _ => {}
        }
    }

    Ok(header)
}

/// Parse a single line-protocol measurement.
pub fn parse_line(line: &str) -> Result<MetricLine, String> {
    let sections = split_unescaped(line, ' ');
    let sections: Vec<&str> = sections.into_iter().filter(|s| !s.is_empty()).collect();

    let (key, fields, offset) = match sections.as_slice() {
        [key, fields] => (*key, *fields, None),
        [key, fields, offset] => (*key, *fields, Some(*offset)),
        [_] => return Err("missing fields".to_string()),
        _ => return Err("too many sections".to_string()),
    };

    let mut key_parts = split_unescaped(key, ',').into_iter();
    let measurement = unescape(key_parts.next().unwrap_or_default());
    if measurement.is_empty() {
        return Err("empty measurement".to_string());
    }

    let tags = key_parts
        .map(|tag| {
            let (k, v) = split_pair(tag).ok_or_else(|| format!("invalid tag '{}'", tag))?;
            Ok((unescape(k), unescape(v)))
        })
        .collect::<Result<Vec<_>, String>>()?;

    let fields = split_unescaped(fields, ',')
        .into_iter()
        .map(|field| {
            let (k, v) = split_pair(field).ok_or_else(|| format!("invalid field '{}'", field))?;
            let value = parse_field_value(v).ok_or_else(|| format!("invalid value '{}'", v))?;
            Ok((unescape(k), value))
        })
        .collect::<Result<Vec<_>, String>>()?;

    let offset = offset
        .map(|o| o.parse::<i64>().map_err(|_| format!("invalid offset '{}'", o)))
        .transpose()?;

    Ok(MetricLine {
        measurement,
        tags,
        fields,
        offset,
    })
}

fn parse_field_value(raw: &str) -> Option<FieldValue> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Some(FieldValue::Text(unescape(&raw[1..raw.len() - 1])));
    }

    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Some(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Some(FieldValue::Boolean(false)),
        _ => {}
    }

    if let Some(int) = raw.strip_suffix('i') {
        return int.parse().ok().map(FieldValue::Integer);
    }
    if let Some(uint) = raw.strip_suffix('u') {
        return uint.parse().ok().map(FieldValue::Unsigned);
    }

    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(FieldValue::Float)
}

/// Split on `separator` outside of backslash escapes and double quotes.
fn split_unescaped(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut quoted = false;

    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            quoted = !quoted;
        } else if c == separator && !quoted {
            parts.push(&input[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Split `key=value` at the first unescaped `=`.
fn split_pair(input: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '=' {
            let (k, v) = (&input[..i], &input[i + 1..]);
            return if k.is_empty() { None } else { Some((k, v)) };
        }
    }
    None
}

fn unescape(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                result.push(next);
            }
        } else {
            result.push(c);
        }
    }
    result
}
