//! Multipart demultiplexer: turns the rolling receive buffer into one JPEG
//! payload per call.
//!
//! Each call walks `SeekBoundary -> DetectEncoding -> PartHeaders -> Body`.
//! A part announced with a chunk-size line is sized from its own
//! `Content-Length` header, never from the hex value; the cameras this runs
//! against do not keep the two consistent.

use crate::buffer::RollingBuffer;
use crate::errors::StreamError;
use crate::http::{CRLF, Headers, MAX_RESPONSE_HEAD, parse_header_line};
use std::io::Read;

/// Largest payload accepted from a single part.
pub const MAX_FRAME_SIZE: usize = 10_000_000;

/// Chunk-size lines longer than this are not treated as chunk framing.
const MAX_CHUNK_SIZE_DIGITS: usize = 8;

const CLOSE_DELIMITER_SUFFIX: &[u8] = b"--";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartEncoding {
    /// A hex chunk-size line followed the delimiter. The size is logged only.
    Chunked { chunk_size: usize },
    /// A plain header block followed the delimiter.
    Plain,
}

/// How the bytes right after a delimiter were classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartStart {
    /// `--boundary--`: the server ended the multipart body.
    Close,
    /// Encoding plus the number of framing bytes to skip before the headers.
    Part { encoding: PartEncoding, skip: usize },
}

/// Everything learned about a part before its body is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPart {
    pub encoding: PartEncoding,
    pub headers: Headers,
}

impl PendingPart {
    /// Number of body bytes to read, or `None` to scan for the next delimiter.
    pub fn payload_len(&self) -> Result<Option<usize>, StreamError> {
        let declared = self.headers.content_length();

        match self.encoding {
            PartEncoding::Chunked { .. } => {
                let len = declared.ok_or(StreamError::MissingContentLength)?;
                validate_frame_size(len).map(Some)
            }
            PartEncoding::Plain => match declared {
                Some(0) | None => Ok(None),
                Some(len) => validate_frame_size(len).map(Some),
            },
        }
    }
}

fn validate_frame_size(len: usize) -> Result<usize, StreamError> {
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(StreamError::InvalidFrameSize(len));
    }
    Ok(len)
}

/// Classify the bytes following a delimiter. `None` means more input is needed.
///
/// Accepted shapes after the delimiter:
/// - `--` (close delimiter)
/// - `CRLF [CRLF] <hex> CRLF headers...` (chunk-size line between parts)
/// - `CRLF headers...`
fn classify_part_start(bytes: &[u8]) -> Option<PartStart> {
    if bytes.len() < 2 {
        return None;
    }
    if bytes.starts_with(CLOSE_DELIMITER_SUFFIX) {
        return Some(PartStart::Close);
    }

    let line_end = if bytes.starts_with(CRLF) { CRLF.len() } else { 0 };
    let plain = Some(PartStart::Part {
        encoding: PartEncoding::Plain,
        skip: line_end,
    });

    let mut cursor = line_end;
    if bytes.len() < cursor + CRLF.len() {
        return None;
    }
    if bytes[cursor..].starts_with(CRLF) {
        cursor += CRLF.len();
        if bytes.len() == cursor {
            return None;
        }
    }

    let digits = bytes[cursor..]
        .iter()
        .take_while(|b| b.is_ascii_hexdigit())
        .count();
    if digits == 0 || digits > MAX_CHUNK_SIZE_DIGITS {
        return plain;
    }

    let after_digits = cursor + digits;
    if bytes.len() < after_digits + CRLF.len() {
        return None;
    }
    if !bytes[after_digits..].starts_with(CRLF) {
        return plain;
    }

    let hex = std::str::from_utf8(&bytes[cursor..after_digits]).ok()?;
    let chunk_size = usize::from_str_radix(hex, 16).ok()?;

    Some(PartStart::Part {
        encoding: PartEncoding::Chunked { chunk_size },
        skip: after_digits + CRLF.len(),
    })
}

pub struct FrameDemuxer {
    boundary: Vec<u8>,
}

impl FrameDemuxer {
    /// `boundary` is the delimiter as it appears in the body, `--` included.
    pub fn new(boundary: impl Into<Vec<u8>>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    pub fn boundary(&self) -> &[u8] {
        &self.boundary
    }

    /// Extract the next part's payload.
    ///
    /// On success the bytes following the payload stay in the buffer for the
    /// next call. After a per-part error the next call simply searches for the
    /// next delimiter again.
    pub fn next_payload<R: Read>(
        &self,
        buffer: &mut RollingBuffer<R>,
    ) -> Result<Vec<u8>, StreamError> {
        self.seek_boundary(buffer)?;
        let encoding = self.detect_encoding(buffer)?;
        let part = PendingPart {
            encoding,
            headers: read_part_headers(buffer)?,
        };

        match part.payload_len()? {
            Some(len) => {
                if let PartEncoding::Chunked { chunk_size } = part.encoding {
                    tracing::trace!(chunk_size, content_length = len, "Chunked part");
                }
                read_exact(buffer, len)
            }
            None => self.read_until_boundary(buffer),
        }
    }

    fn seek_boundary<R: Read>(&self, buffer: &mut RollingBuffer<R>) -> Result<(), StreamError> {
        loop {
            if let Some(pos) = buffer.find(&self.boundary) {
                return buffer.consume(pos + self.boundary.len());
            }

            // A delimiter split across reads can only start in the last
            // `len - 1` bytes; everything before that is skippable.
            let skippable = buffer
                .available()
                .saturating_sub(self.boundary.len().saturating_sub(1));
            buffer.consume(skippable)?;
            buffer.fill()?;
        }
    }

    fn detect_encoding<R: Read>(
        &self,
        buffer: &mut RollingBuffer<R>,
    ) -> Result<PartEncoding, StreamError> {
        loop {
            match classify_part_start(buffer.unconsumed()) {
                Some(PartStart::Close) => {
                    tracing::debug!("Received closing multipart delimiter");
                    return Err(StreamError::StreamClosed);
                }
                Some(PartStart::Part { encoding, skip }) => {
                    buffer.consume(skip)?;
                    return Ok(encoding);
                }
                None => {
                    buffer.fill()?;
                }
            }
        }
    }

    fn read_until_boundary<R: Read>(
        &self,
        buffer: &mut RollingBuffer<R>,
    ) -> Result<Vec<u8>, StreamError> {
        let mut payload = Vec::new();

        loop {
            if let Some(pos) = buffer.find(&self.boundary) {
                buffer.take_into(pos, &mut payload);
                if payload.ends_with(CRLF) {
                    payload.truncate(payload.len() - CRLF.len());
                }
                return validate_frame_size(payload.len()).map(|_| payload);
            }

            let safe = buffer
                .available()
                .saturating_sub(self.boundary.len().saturating_sub(1));
            buffer.take_into(safe, &mut payload);
            if payload.len() > MAX_FRAME_SIZE {
                return Err(StreamError::InvalidFrameSize(payload.len()));
            }
            buffer.fill()?;
        }
    }
}

/// Parse header lines up to and including the blank line.
///
/// A header block longer than [`MAX_RESPONSE_HEAD`] abandons the part; the
/// next call resumes at the following delimiter.
fn read_part_headers<R: Read>(buffer: &mut RollingBuffer<R>) -> Result<Headers, StreamError> {
    let mut headers = Headers::default();
    let mut header_bytes = 0;

    loop {
        let Some(line_len) = buffer.find(CRLF) else {
            if header_bytes + buffer.available() > MAX_RESPONSE_HEAD {
                return Err(StreamError::PartHeadersTooLarge(MAX_RESPONSE_HEAD));
            }
            buffer.fill()?;
            continue;
        };

        if line_len == 0 {
            buffer.consume(CRLF.len())?;
            return Ok(headers);
        }

        header_bytes += line_len + CRLF.len();
        if header_bytes > MAX_RESPONSE_HEAD {
            return Err(StreamError::PartHeadersTooLarge(MAX_RESPONSE_HEAD));
        }

        if let Some((name, value)) = parse_header_line(&buffer.unconsumed()[..line_len]) {
            headers.push(name, value);
        }
        buffer.consume(line_len + CRLF.len())?;
    }
}

fn read_exact<R: Read>(buffer: &mut RollingBuffer<R>, len: usize) -> Result<Vec<u8>, StreamError> {
    let mut payload = Vec::with_capacity(len);

    while payload.len() < len {
        if buffer.available() == 0 {
            buffer.fill()?;
        }
        let remaining = len - payload.len();
        buffer.take_into(remaining, &mut payload);
    }

    Ok(payload)
}
