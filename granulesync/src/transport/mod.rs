//! HTTP transport abstraction.
//!
//! The fetcher talks to the network only through [`Transport`], which returns
//! a streaming body for a URL. This keeps the download engine testable with
//! in-process mocks and leaves retry-on-transient-failure to the transport
//! itself ([`ReqwestTransport`] with a [`RetryPolicy`]).

mod http;
mod retry;

use std::io::Read;

use thiserror::Error;

pub use http::{ReqwestTransport, DEFAULT_TIMEOUT_SECS, MAX_REDIRECTS};
pub use retry::{
    RetryPolicy, DEFAULT_BACKOFF_FACTOR_MS, DEFAULT_MAX_BACKOFF_SECS, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_STATUSES,
};

/// A response body being streamed from the server.
pub type Body = Box<dyn Read + Send>;

/// Errors produced by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),

    /// The URL could not be parsed or followed.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The server could not be reached.
    #[error("connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    /// The request did not complete in time.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Any other request failure.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// A redirect chain exceeded [`MAX_REDIRECTS`].
    #[error("too many redirects starting at {url}")]
    TooManyRedirects { url: String },
}

impl TransportError {
    /// Whether the failure is worth retrying at the transport layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}

/// Capability to fetch a URL as a byte stream.
///
/// Implementations are shared across worker threads and must not keep
/// per-request state.
pub trait Transport: Send + Sync {
    /// Issue a GET for `url`, returning the body on a success status.
    fn get(&self, url: &str) -> Result<Body, TransportError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{self, Cursor};
    use std::sync::Mutex;

    /// What a mock transport does for a URL.
    #[derive(Clone)]
    pub enum MockResponse {
        /// Serve these bytes.
        Body(Vec<u8>),
        /// Fail the request with this status.
        Status(u16),
        /// Serve `good` bytes, then fail the read.
        Truncated(Vec<u8>),
        /// Panic inside the request.
        Panic,
    }

    /// In-memory transport recording every requested URL.
    pub struct MockTransport {
        responses: HashMap<String, MockResponse>,
        default: MockResponse,
        pub requests: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn serving(default: MockResponse) -> Self {
            Self {
                responses: HashMap::new(),
                default,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn with(mut self, url: &str, response: MockResponse) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn requested(&self, url: &str) -> bool {
            self.requests.lock().unwrap().iter().any(|u| u == url)
        }
    }

    struct FailingTail {
        head: Cursor<Vec<u8>>,
    }

    impl Read for FailingTail {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.head.read(buf)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
            }
            Ok(n)
        }
    }

    impl Transport for MockTransport {
        fn get(&self, url: &str) -> Result<Body, TransportError> {
            self.requests.lock().unwrap().push(url.to_string());
            let response = self.responses.get(url).unwrap_or(&self.default).clone();
            match response {
                MockResponse::Body(bytes) => Ok(Box::new(Cursor::new(bytes))),
                MockResponse::Status(status) => Err(TransportError::Status {
                    url: url.to_string(),
                    status,
                }),
                MockResponse::Truncated(bytes) => Ok(Box::new(FailingTail {
                    head: Cursor::new(bytes),
                })),
                MockResponse::Panic => panic!("mock transport panic for {}", url),
            }
        }
    }

    #[test]
    fn test_transient_classification() {
        let timeout = TransportError::Timeout {
            url: "u".to_string(),
            timeout_secs: 1,
        };
        let status = TransportError::Status {
            url: "u".to_string(),
            status: 404,
        };
        assert!(timeout.is_transient());
        assert!(!status.is_transient());
    }

    #[test]
    fn test_mock_transport_records_requests() {
        let transport = MockTransport::serving(MockResponse::Body(vec![1, 2, 3]))
            .with("https://h/missing", MockResponse::Status(404));

        let mut body = transport.get("https://h/ok").unwrap();
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);

        assert_eq!(
            transport.get("https://h/missing").err(),
            Some(TransportError::Status {
                url: "https://h/missing".to_string(),
                status: 404
            })
        );
        assert_eq!(transport.request_count(), 2);
    }
}
