use crate::errors::StreamError;
use std::fmt;
use url::Url;

const DEFAULT_HTTP_PORT: u16 = 80;

/// Location of an MJPEG endpoint. Only plain `http://` is supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUrl {
    host: String,
    port: u16,
    request_target: String,
}

impl StreamUrl {
    pub fn parse(input: &str) -> Result<Self, StreamError> {
        let invalid = |reason: &str| StreamError::InvalidUrl {
            url: input.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(input.trim()).map_err(|e| invalid(&e.to_string()))?;

        if url.scheme() != "http" {
            return Err(invalid("only the http scheme is supported"));
        }

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(invalid("missing host")),
        };

        let mut request_target = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };
        if let Some(query) = url.query() {
            request_target.push('?');
            request_target.push_str(query);
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_HTTP_PORT),
            request_target,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path plus query, as sent on the request line.
    pub fn request_target(&self) -> &str {
        &self.request_target
    }

    /// Value for the `Host` request header.
    pub fn host_header(&self) -> String {
        if self.port == DEFAULT_HTTP_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for StreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}{}", self.host, self.port, self.request_target)
    }
}
