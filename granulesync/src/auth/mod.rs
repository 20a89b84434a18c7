//! Credential handling for the remote data provider.
//!
//! The download engine only needs two things from authentication: whether
//! credentials are currently usable, and a way to (re)acquire them. Both are
//! expressed by [`CredentialProvider`], which is consulted lazily before any
//! network operation.
//!
//! [`NetrcCredentials`] is the provider used by the CLI; it reads a `.netrc`
//! file and hands the login to [`ReqwestTransport`](crate::transport::ReqwestTransport)
//! for HTTP basic authentication.

mod netrc;

pub use netrc::{Credentials, NetrcCredentials, DEFAULT_MACHINE};

/// Capability to authenticate against the remote data provider.
///
/// Implementations must be safe to call from several worker threads at once.
pub trait CredentialProvider: Send + Sync {
    /// Whether usable credentials are currently held.
    fn is_authenticated(&self) -> bool;

    /// Acquire or refresh credentials.
    ///
    /// Returns `false` when authentication is not possible; callers treat this
    /// as terminal for the current operation.
    fn authenticate(&self) -> bool;
}

/// Make sure `provider` holds credentials, authenticating if needed.
pub fn ensure_authenticated(provider: &dyn CredentialProvider) -> bool {
    provider.is_authenticated() || provider.authenticate()
}
