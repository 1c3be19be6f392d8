use std::io;
use thiserror::Error;

/// Failures while negotiating the HTTP response that precedes the multipart body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("response headers exceed {0} bytes")]
    HeaderTooLarge(usize),

    #[error("malformed HTTP status line")]
    MalformedStatusLine,

    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error("response has no Content-Type header")]
    MissingContentType,

    #[error("unsupported content type '{0}', expected multipart/x-mixed-replace")]
    UnsupportedContentType(String),

    #[error("multipart content type has no boundary")]
    MissingBoundary,
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("invalid stream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("stream closed by peer")]
    StreamClosed,

    #[error("invalid frame size: {0} bytes")]
    InvalidFrameSize(usize),

    #[error("part headers have no Content-Length")]
    MissingContentLength,

    #[error("cannot consume {requested} bytes, only {available} buffered")]
    BufferOverrun { requested: usize, available: usize },

    #[error("no room left in the {0} byte receive buffer")]
    BufferFull(usize),

    #[error("part headers exceed {0} bytes without a blank line")]
    PartHeadersTooLarge(usize),

    #[error("JPEG decode failed: {0}")]
    Decode(String),

    #[error("resize failed: {0}")]
    Resize(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// Whether the connection is unusable after this error.
    ///
    /// Per-part framing problems and decode failures only cost the current
    /// frame; the next extraction starts again from the boundary search.
    pub fn is_fatal(&self) -> bool {
        match self {
            StreamError::InvalidFrameSize(_)
            | StreamError::MissingContentLength
            | StreamError::BufferFull(_)
            | StreamError::PartHeadersTooLarge(_)
            | StreamError::Decode(_)
            | StreamError::Resize(_) => false,
            StreamError::InvalidUrl { .. }
            | StreamError::Connect { .. }
            | StreamError::Protocol(_)
            | StreamError::StreamClosed
            | StreamError::BufferOverrun { .. }
            | StreamError::Io(_) => true,
        }
    }
}

impl From<turbojpeg::Error> for StreamError {
    fn from(e: turbojpeg::Error) -> Self {
        StreamError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = StreamError::from(ProtocolError::MissingBoundary);
        assert_eq!(
            err.to_string(),
            "protocol error: multipart content type has no boundary"
        );

        let err = StreamError::InvalidFrameSize(0);
        assert_eq!(err.to_string(), "invalid frame size: 0 bytes");

        let err = StreamError::BufferOverrun {
            requested: 10,
            available: 4,
        };
        assert_eq!(err.to_string(), "cannot consume 10 bytes, only 4 buffered");

        let err = ProtocolError::UnsupportedContentType("text/html".to_string());
        assert_eq!(
            err.to_string(),
            "unsupported content type 'text/html', expected multipart/x-mixed-replace"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(StreamError::StreamClosed.is_fatal());
        assert!(StreamError::Protocol(ProtocolError::MissingContentType).is_fatal());
        assert!(StreamError::Io(io::Error::other("reset")).is_fatal());

        assert!(!StreamError::MissingContentLength.is_fatal());
        assert!(!StreamError::InvalidFrameSize(20_000_000).is_fatal());
        assert!(!StreamError::PartHeadersTooLarge(8192).is_fatal());
        assert!(!StreamError::Decode("bad huffman table".into()).is_fatal());
    }

    #[test]
    fn test_io_error_converts_with_question_mark() {
        fn fails() -> Result<(), io::Error> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }

        fn propagates() -> Result<(), StreamError> {
            fails()?;
            Ok(())
        }

        match propagates().unwrap_err() {
            StreamError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("Expected Io variant, got {other:?}"),
        }
    }
}
