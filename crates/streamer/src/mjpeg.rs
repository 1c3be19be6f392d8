//! `multipart/x-mixed-replace` encoding and fan-out to HTTP clients.

use crate::config::Framing;
use axum::{
    body::Body,
    extract::State,
    http::header,
    response::IntoResponse,
};
use bytes::Bytes;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

pub const BOUNDARY: &str = "frame";

/// Frames kept for slow clients before they start skipping.
const BROADCAST_CAPACITY: usize = 4;
const CLIENT_QUEUE: usize = 8;

/// One encoded part. Each item is written as its own body frame.
pub type Part = Arc<Vec<Bytes>>;

/// Lay out one JPEG as a multipart part.
pub fn encode_part(framing: Framing, jpeg: &[u8]) -> Vec<Bytes> {
    let delimiter = format!("--{BOUNDARY}");
    let mut headers = String::from("Content-Type: image/jpeg\r\n");
    if framing != Framing::BoundaryOnly {
        headers.push_str(&format!("Content-Length: {}\r\n", jpeg.len()));
    }
    headers.push_str("\r\n");

    let mut body = Vec::with_capacity(headers.len() + jpeg.len() + 2);
    body.extend_from_slice(headers.as_bytes());
    body.extend_from_slice(jpeg);
    body.extend_from_slice(b"\r\n");

    match framing {
        Framing::SplitChunks => vec![Bytes::from(delimiter), Bytes::from(body)],
        Framing::ContentLength | Framing::BoundaryOnly => {
            let mut part = format!("{delimiter}\r\n").into_bytes();
            part.extend_from_slice(&body);
            vec![Bytes::from(part)]
        }
    }
}

pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

#[derive(Clone)]
pub struct AppState {
    pub tx: Arc<broadcast::Sender<Part>>,
}

impl AppState {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx: Arc::new(tx) }
    }

    /// Returns the number of connected clients.
    pub fn publish(&self, part: Part) -> usize {
        self.tx.send(part).unwrap_or(0)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn index() -> &'static str {
    "MJPEG stream available at /stream\n"
}

pub async fn stream_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut frames = state.tx.subscribe();
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(CLIENT_QUEUE);
    tracing::info!("Client connected ({} total)", state.tx.receiver_count());

    tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(part) => {
                    for item in part.iter() {
                        if tx.send(Ok(item.clone())).await.is_err() {
                            tracing::info!("Client disconnected");
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Slow client skipped {} frames", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    let headers = [
        (header::CONTENT_TYPE, content_type()),
        (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate".to_string()),
    ];
    (headers, Body::from_stream(ReceiverStream::new(rx))).into_response()
}

/// Render, encode and broadcast frames at `fps` until the process stops.
pub async fn generate(
    state: AppState,
    mut pattern: crate::pattern::TestPattern,
    framing: Framing,
    fps: u32,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs_f64(1.0 / fps as f64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sent = 0u64;

    loop {
        ticker.tick().await;
        let counter = pattern.counter();
        let jpeg = pattern.next_jpeg()?;
        let clients = state.publish(Arc::new(encode_part(framing, &jpeg)));

        sent += 1;
        if sent.is_multiple_of(fps as u64 * 10) {
            tracing::debug!(
                "Status: [Frames: {}] [Counter: {}] [Clients: {}] [Last size: {}]",
                sent,
                counter,
                clients,
                jpeg.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use receiver::connection::StreamConnection;
    use receiver::{MjpegDecoder, PixelLayout};
    use std::io::Cursor;

    const PAYLOADS: [&[u8]; 3] = [b"first jpeg", b"second\r\n--fr payload", b"third"];

    /// Wire bytes as an HTTP/1.1 server would send them with chunked
    /// transfer coding: every item becomes one chunk.
    fn chunked_wire(framing: Framing) -> Vec<u8> {
        let mut wire = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: {}\r\ntransfer-encoding: chunked\r\n\r\n",
            content_type()
        )
        .into_bytes();
        for payload in PAYLOADS {
            for item in encode_part(framing, payload) {
                wire.extend(format!("{:x}\r\n", item.len()).into_bytes());
                wire.extend_from_slice(&item);
                wire.extend_from_slice(b"\r\n");
            }
        }
        wire.extend_from_slice(b"0\r\n\r\n");
        wire
    }

    fn received_payloads(framing: Framing, count: usize) -> Vec<Vec<u8>> {
        let decoder = Box::new(MjpegDecoder::new(PixelLayout::Rgba).unwrap());
        let mut connection =
            StreamConnection::handshake(Cursor::new(chunked_wire(framing)), 256, decoder).unwrap();
        (0..count)
            .map(|_| connection.next_payload().unwrap())
            .collect()
    }

    #[test]
    fn test_part_layouts() {
        let parts = encode_part(Framing::ContentLength, b"abc");
        assert_eq!(parts.len(), 1);
        assert_eq!(
            &parts[0][..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n"
        );

        let parts = encode_part(Framing::BoundaryOnly, b"abc");
        assert_eq!(&parts[0][..], b"--frame\r\nContent-Type: image/jpeg\r\n\r\nabc\r\n");

        let parts = encode_part(Framing::SplitChunks, b"abc");
        assert_eq!(parts.len(), 2);
        assert_eq!(&parts[0][..], b"--frame");
        assert!(parts[1].starts_with(b"Content-Type: image/jpeg\r\n"));
    }

    #[test]
    fn test_content_length_framing_round_trips_through_receiver() {
        let payloads = received_payloads(Framing::ContentLength, PAYLOADS.len());
        assert_eq!(payloads, PAYLOADS.map(<[u8]>::to_vec));
    }

    #[test]
    fn test_split_chunks_framing_round_trips_through_receiver() {
        let payloads = received_payloads(Framing::SplitChunks, PAYLOADS.len());
        assert_eq!(payloads, PAYLOADS.map(<[u8]>::to_vec));
    }

    #[test]
    fn test_boundary_only_payloads_start_with_body() {
        // Without lengths, transfer chunk lines before the next delimiter
        // stay attached to the payload tail.
        let payloads = received_payloads(Framing::BoundaryOnly, 2);
        for (payload, expected) in payloads.iter().zip(PAYLOADS) {
            assert!(payload.starts_with(expected));
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let state = AppState::new();
        assert_eq!(state.publish(Arc::new(vec![Bytes::from_static(b"x")])), 0);

        let mut rx = state.tx.subscribe();
        assert_eq!(state.publish(Arc::new(vec![Bytes::from_static(b"y")])), 1);
        let part = rx.recv().await.unwrap();
        assert_eq!(&part[0][..], b"y");
    }
}
