use crate::buffer::RollingBuffer;
use crate::config::StreamConfig;
use crate::decoder::{FrameDecoder, MjpegDecoder};
use crate::demux::FrameDemuxer;
use crate::errors::{ProtocolError, StreamError};
use crate::frame::DecodedFrame;
use crate::http::{MAX_RESPONSE_HEAD, read_response_head};
use crate::transport;
use std::io::Read;
use std::net::TcpStream;

/// An accepted multipart stream: receive buffer, demultiplexer and decoder
/// for one source.
pub struct StreamConnection<R> {
    buffer: RollingBuffer<R>,
    demuxer: FrameDemuxer,
    decoder: Box<dyn FrameDecoder>,
}

impl<R: Read> StreamConnection<R> {
    /// Read the response head from `source` and accept it if it announces a
    /// multipart body.
    ///
    /// The request must already have been sent. Body bytes that arrived with
    /// the head seed the receive buffer.
    pub fn handshake(
        mut source: R,
        capacity: usize,
        decoder: Box<dyn FrameDecoder>,
    ) -> Result<Self, StreamError> {
        let (head, leftover) = read_response_head(&mut source, MAX_RESPONSE_HEAD)?;

        if !(200..300).contains(&head.status) {
            return Err(ProtocolError::UnexpectedStatus(head.status).into());
        }
        let boundary = head.multipart_boundary()?;

        tracing::debug!(
            status = head.status,
            boundary = %boundary,
            headers = head.headers.len(),
            buffered = leftover.len(),
            "Multipart stream accepted"
        );

        Ok(Self {
            buffer: RollingBuffer::with_initial(source, capacity, &leftover),
            demuxer: FrameDemuxer::new(boundary),
            decoder,
        })
    }

    pub fn boundary(&self) -> &[u8] {
        self.demuxer.boundary()
    }

    pub fn next_payload(&mut self) -> Result<Vec<u8>, StreamError> {
        self.demuxer.next_payload(&mut self.buffer)
    }

    /// Extract and decode the next part.
    ///
    /// A decode failure consumes the part; the following call moves on to the
    /// next one.
    pub fn next_frame(&mut self) -> Result<DecodedFrame, StreamError> {
        let payload = self.next_payload()?;
        self.decoder.decode(&payload)
    }
}

/// Connect, send the request and accept the response.
///
/// Also returns a second handle to the same socket so the owner can shut
/// down the read side while a producer is blocked in `recv`.
pub fn open(config: &StreamConfig) -> Result<(StreamConnection<TcpStream>, TcpStream), StreamError> {
    let mut socket = transport::connect(&config.url, config.connect_timeout, config.read_timeout)?;
    transport::send_request(&mut socket, &config.url)?;
    let control = socket.try_clone()?;

    let decoder = MjpegDecoder::new(config.pixel_layout)?
        .with_diagnostics(config.diagnostics_dir.clone());
    let connection =
        StreamConnection::handshake(socket, config.buffer_capacity, Box::new(decoder))?;

    tracing::info!(url = %config.url, "Connected to MJPEG stream");
    Ok((connection, control))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use image::{ImageEncoder, codecs::jpeg::JpegEncoder};
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let pixels = vec![90u8; (width * height * 3) as usize];
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .write_image(&pixels, width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    fn decoder() -> Box<dyn FrameDecoder> {
        Box::new(MjpegDecoder::new(PixelLayout::Rgba).unwrap())
    }

    fn response(content_type: &str, body: &[u8]) -> Vec<u8> {
        let mut bytes =
            format!("HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\n\r\n").into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    fn part(payload: &[u8]) -> Vec<u8> {
        let mut bytes = format!(
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            payload.len()
        )
        .into_bytes();
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    #[test]
    fn test_handshake_keeps_body_bytes_received_with_head() {
        let image = jpeg(16, 8);
        let stream = response("multipart/x-mixed-replace; boundary=frame", &part(&image));

        let mut connection =
            StreamConnection::handshake(Cursor::new(stream), 8192, decoder()).unwrap();
        assert_eq!(connection.boundary(), b"--frame");
        assert_eq!(connection.next_payload().unwrap(), image);
    }

    #[test]
    fn test_next_frame_decodes_parts_in_order() {
        let mut body = part(&jpeg(16, 8));
        body.extend(part(&jpeg(32, 16)));
        let stream = response("multipart/x-mixed-replace;boundary=\"frame\"", &body);

        let mut connection =
            StreamConnection::handshake(Cursor::new(stream), 1024, decoder()).unwrap();

        let first = connection.next_frame().unwrap();
        let second = connection.next_frame().unwrap();
        assert_eq!((first.width, first.height), (16, 8));
        assert_eq!((second.width, second.height), (32, 16));
        assert!(matches!(
            connection.next_frame(),
            Err(StreamError::StreamClosed)
        ));
    }

    #[test]
    fn test_garbage_part_is_decode_error_then_stream_continues() {
        let mut body = part(&[0u8; 64]);
        body.extend(part(&jpeg(8, 8)));
        let stream = response("multipart/x-mixed-replace; boundary=frame", &body);

        let mut connection =
            StreamConnection::handshake(Cursor::new(stream), 1024, decoder()).unwrap();

        let err = connection.next_frame().unwrap_err();
        assert!(matches!(err, StreamError::Decode(_)), "got {err:?}");
        assert!(!err.is_fatal());
        assert_eq!(connection.next_frame().unwrap().width, 8);
    }

    #[test]
    fn test_handshake_rejections() {
        let missing_boundary = response("multipart/x-mixed-replace", b"");
        assert!(matches!(
            StreamConnection::handshake(Cursor::new(missing_boundary), 1024, decoder()),
            Err(StreamError::Protocol(ProtocolError::MissingBoundary))
        ));

        let not_multipart = response("text/html", b"<html>");
        assert!(matches!(
            StreamConnection::handshake(Cursor::new(not_multipart), 1024, decoder()),
            Err(StreamError::Protocol(ProtocolError::UnsupportedContentType(_)))
        ));

        let not_found = b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\n".to_vec();
        assert!(matches!(
            StreamConnection::handshake(Cursor::new(not_found), 1024, decoder()),
            Err(StreamError::Protocol(ProtocolError::UnexpectedStatus(404)))
        ));
    }
}
