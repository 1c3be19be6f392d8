use crate::errors::{ProtocolError, StreamError};
use std::io::{ErrorKind, Read};

/// Hard cap on the size of the initial response head.
pub const MAX_RESPONSE_HEAD: usize = 8192;

pub(crate) const CRLF: &[u8] = b"\r\n";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const MULTIPART_MIXED_REPLACE: &str = "multipart/x-mixed-replace";
const BOUNDARY_ATTRIBUTE: &str = "boundary=";

/// Header fields in arrival order. Lookups are case-insensitive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn push(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `Content-Length` as a byte count; `None` when missing or not a number.
    pub fn content_length(&self) -> Option<usize> {
        self.get("content-length")
            .and_then(|value| value.trim().parse().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split a single `Name: value` line (without its CRLF).
///
/// Lines without a colon or that are not UTF-8 yield `None` and are skipped by
/// callers.
pub fn parse_header_line(line: &[u8]) -> Option<(&str, &str)> {
    let line = std::str::from_utf8(line).ok()?;
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Headers,
}

impl ResponseHead {
    /// Parse a complete head. `bytes` must end at (and include) the blank line.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut lines = bytes
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line));

        let status_line = lines.next().ok_or(ProtocolError::MalformedStatusLine)?;
        let status = parse_status_line(status_line)?;

        let mut headers = Headers::default();
        for line in lines.take_while(|line| !line.is_empty()) {
            if let Some((name, value)) = parse_header_line(line) {
                headers.push(name, value);
            }
        }

        Ok(Self { status, headers })
    }

    /// The multipart delimiter as it appears in the body: `--` + boundary.
    pub fn multipart_boundary(&self) -> Result<String, ProtocolError> {
        let content_type = self
            .headers
            .get("content-type")
            .ok_or(ProtocolError::MissingContentType)?;

        extract_boundary(content_type)
    }
}

fn parse_status_line(line: &[u8]) -> Result<u16, ProtocolError> {
    let line = std::str::from_utf8(line).map_err(|_| ProtocolError::MalformedStatusLine)?;
    let mut parts = line.split_whitespace();

    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| ProtocolError::MalformedStatusLine),
        _ => Err(ProtocolError::MalformedStatusLine),
    }
}

/// Pull the boundary token out of a `Content-Type` value.
///
/// The value may be quoted and ends at a quote, CR, LF or `;`.
pub fn extract_boundary(content_type: &str) -> Result<String, ProtocolError> {
    let lowered = content_type.to_ascii_lowercase();
    if !lowered.contains(MULTIPART_MIXED_REPLACE) {
        return Err(ProtocolError::UnsupportedContentType(
            content_type.to_string(),
        ));
    }

    let start = lowered
        .find(BOUNDARY_ATTRIBUTE)
        .map(|idx| idx + BOUNDARY_ATTRIBUTE.len())
        .ok_or(ProtocolError::MissingBoundary)?;

    let raw = &content_type[start..];
    let raw = raw.strip_prefix('"').unwrap_or(raw);
    let token = raw
        .split(['"', '\r', '\n', ';'])
        .next()
        .unwrap_or_default()
        .trim_end();

    if token.is_empty() {
        return Err(ProtocolError::MissingBoundary);
    }

    Ok(format!("--{token}"))
}

pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Read from `source` until the end-of-headers marker arrives.
///
/// Returns the parsed head and whatever body bytes were received past the
/// marker; those are the first bytes of the multipart stream and must not be
/// dropped.
pub fn read_response_head<R: Read>(
    source: &mut R,
    limit: usize,
) -> Result<(ResponseHead, Vec<u8>), StreamError> {
    let mut received = Vec::with_capacity(limit.min(MAX_RESPONSE_HEAD));
    let mut chunk = [0u8; 1024];

    loop {
        let scan_from = received.len().saturating_sub(HEADER_TERMINATOR.len() - 1);
        let n = match source.read(&mut chunk) {
            Ok(0) => return Err(StreamError::StreamClosed),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        received.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find_subslice(&received[scan_from..], HEADER_TERMINATOR) {
            let head_end = scan_from + pos + HEADER_TERMINATOR.len();
            if head_end > limit {
                return Err(ProtocolError::HeaderTooLarge(limit).into());
            }
            let head = ResponseHead::parse(&received[..head_end])?;
            let leftover = received.split_off(head_end);
            return Ok((head, leftover));
        }

        if received.len() >= limit {
            return Err(ProtocolError::HeaderTooLarge(limit).into());
        }
    }
}
