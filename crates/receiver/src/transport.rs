use crate::errors::StreamError;
use crate::url::StreamUrl;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Open a TCP connection to the stream's host.
///
/// Numeric and DNS hosts both go through the platform resolver; every
/// candidate address is tried in order until one accepts. No retries happen
/// here, reconnect policy belongs to the caller.
pub fn connect(
    url: &StreamUrl,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
) -> Result<TcpStream, StreamError> {
    let target = format!("{}:{}", url.host(), url.port());
    let connect_error = |source: io::Error| StreamError::Connect {
        target: target.clone(),
        source,
    };

    let addrs = (url.host(), url.port())
        .to_socket_addrs()
        .map_err(connect_error)?;

    let mut last_error = None;
    for addr in addrs {
        tracing::trace!(%addr, "Trying candidate address");
        match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(socket) => {
                socket.set_nodelay(true)?;
                socket.set_read_timeout(read_timeout)?;
                tracing::debug!(%addr, "TCP connection established");
                return Ok(socket);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "Candidate address refused connection");
                last_error = Some(e);
            }
        }
    }

    Err(connect_error(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    })))
}

/// Build the minimal GET request the stream endpoint expects.
pub fn request_bytes(url: &StreamUrl) -> Vec<u8> {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: keep-alive\r\n\r\n",
        url.request_target(),
        url.host_header()
    )
    .into_bytes()
}

pub fn send_request<W: Write>(socket: &mut W, url: &StreamUrl) -> Result<(), StreamError> {
    socket.write_all(&request_bytes(url))?;
    socket.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_request_format() {
        let url = StreamUrl::parse("http://10.0.0.7:8081/video").unwrap();
        let request = String::from_utf8(request_bytes(&url)).unwrap();
        assert_eq!(
            request,
            "GET /video HTTP/1.1\r\nHost: 10.0.0.7:8081\r\nConnection: keep-alive\r\n\r\n"
        );
    }

    #[test]
    fn test_connect_and_send_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = StreamUrl::parse(&format!("http://localhost:{port}/stream")).unwrap();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut chunk = [0u8; 64];
            while !received.ends_with(b"\r\n\r\n") {
                let n = socket.read(&mut chunk).unwrap();
                assert!(n > 0, "client closed before finishing the request");
                received.extend_from_slice(&chunk[..n]);
            }
            String::from_utf8(received).unwrap()
        });

        let mut socket = connect(&url, Duration::from_secs(2), None).unwrap();
        send_request(&mut socket, &url).unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /stream HTTP/1.1\r\n"));
    }

    #[test]
    fn test_connect_refused_is_connect_error() {
        // Bind then drop to get a port nobody is listening on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = StreamUrl::parse(&format!("http://127.0.0.1:{port}/")).unwrap();

        let err = connect(&url, Duration::from_millis(500), None).unwrap_err();
        assert!(matches!(err, StreamError::Connect { .. }));
        assert!(err.is_fatal());
    }
}
