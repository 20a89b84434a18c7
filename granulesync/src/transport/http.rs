//! reqwest-backed transport with retries and credential-aware redirects.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{LOCATION, RETRY_AFTER};
use reqwest::redirect::Policy;
use reqwest::Url;

use super::retry::RetryPolicy;
use super::{Body, Transport, TransportError};
use crate::auth::NetrcCredentials;

/// Default timeout in seconds for the response headers and for each body
/// read. A transfer that keeps receiving data is never cut off.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

/// Blocking HTTP transport.
///
/// Redirects are followed manually so that basic-auth credentials are only
/// sent to the host named by the credential provider (the login service),
/// never to the data hosts in between. Session cookies set along the way
/// are kept by the client.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
    credentials: Option<Arc<NetrcCredentials>>,
}

impl ReqwestTransport {
    /// Create a transport with the default timeout and retry policy.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(Duration::from_secs(DEFAULT_TIMEOUT_SECS), RetryPolicy::default())
    }

    /// Create a transport with a custom timeout and retry policy.
    ///
    /// The blocking client applies `timeout` to waiting for response
    /// headers and to every body read, not to the transfer as a whole.
    pub fn with_config(timeout: Duration, retry: RetryPolicy) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .cookie_store(true)
            .user_agent(concat!("granulesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            retry,
            credentials: None,
        })
    }

    /// Attach basic-auth credentials for the provider's login host.
    pub fn with_credentials(mut self, credentials: Arc<NetrcCredentials>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The configured retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send one GET, following redirects.
    fn send_once(&self, url: &str) -> Result<Response, TransportError> {
        let mut current = Url::parse(url).map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.client.get(current.clone());
            if let Some(credentials) = self.credentials_for(&current) {
                request = request.basic_auth(credentials.login, Some(credentials.password));
            }

            let response = request.send().map_err(|e| self.classify(url, e))?;
            if !response.status().is_redirection() {
                return Ok(response);
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return Ok(response);
            };
            current = current
                .join(location)
                .map_err(|e| TransportError::InvalidUrl {
                    url: location.to_string(),
                    reason: e.to_string(),
                })?;
            tracing::trace!(from = url, to = %current, "Following redirect");
        }

        Err(TransportError::TooManyRedirects {
            url: url.to_string(),
        })
    }

    fn credentials_for(&self, url: &Url) -> Option<crate::auth::Credentials> {
        let provider = self.credentials.as_ref()?;
        if url.host_str() == Some(provider.machine()) {
            provider.credentials()
        } else {
            None
        }
    }

    fn classify(&self, url: &str, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else if error.is_connect() {
            TransportError::Connect {
                url: url.to_string(),
                reason: error.to_string(),
            }
        } else {
            TransportError::Request {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<Body, TransportError> {
        let mut retry = 0;

        loop {
            let (error, server_delay) = match self.send_once(url) {
                Ok(response) if response.status().is_success() => {
                    return Ok(Box::new(response));
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let error = TransportError::Status {
                        url: url.to_string(),
                        status,
                    };
                    if !self.retry.should_retry_status(status) {
                        return Err(error);
                    }
                    (error, retry_after(&response))
                }
                Err(error) if error.is_transient() => (error, None),
                Err(error) => return Err(error),
            };

            if retry >= self.retry.max_retries {
                return Err(error);
            }
            retry += 1;

            let delay = server_delay
                .unwrap_or_else(|| self.retry.backoff(retry))
                .min(self.retry.max_backoff);
            tracing::warn!(
                url,
                retry,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );
            thread::sleep(delay);
        }
    }
}

/// Parse a numeric `Retry-After` header.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
