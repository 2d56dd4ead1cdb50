//! Read-only access to the bearer credential forwarded on every successful open.
//!
//! Credential acquisition and storage belong to the application; this crate only reads
//! the current value through [`CredentialProvider`] and never persists it.

/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};

/// Source of the credential sent in the `authenticate` frame.
///
/// Queried once per successful open, so a token refreshed by the application between
/// reconnects is picked up automatically. Returning `None` skips authentication.
pub trait CredentialProvider: Send + Sync + 'static {
    fn token(&self) -> Option<SecretString>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<SecretString> + Send + Sync + 'static,
{
    fn token(&self) -> Option<SecretString> {
        self()
    }
}

/// A credential that never changes for the lifetime of the client.
#[derive(Clone, Debug)]
pub struct StaticToken(SecretString);

impl StaticToken {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self(SecretString::from(token))
    }
}

impl CredentialProvider for StaticToken {
    fn token(&self) -> Option<SecretString> {
        Some(self.0.clone())
    }
}

/// Provider used when the client was built without credentials.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn token(&self) -> Option<SecretString> {
        None
    }
}
