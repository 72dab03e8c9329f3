//! Builder for [`CallClient`].
//!
//! # Example
//!
//! ```no_run
//! use call_signal::{CallClient, MediaKind};
//!
//! # async fn example() -> call_signal::Result<()> {
//! let client = CallClient::builder()
//!     .server_url("ws://127.0.0.1:9000/")
//!     .user("alice")
//!     .start()
//!     .await?;
//!
//! client.place_call("bob", MediaKind::Audio).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::UserId;
use crate::media::{MediaDevice, NullMedia};

use super::core::CallClient;
use super::options::ClientOptions;

// ============================================================================
// CallClientBuilder
// ============================================================================

/// Builder for configuring and starting a [`CallClient`].
///
/// Use [`CallClient::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct CallClientBuilder {
    /// Signaling server endpoint.
    server_url: Option<String>,
    /// Authenticated local user.
    user: Option<UserId>,
    /// Media pipeline; [`NullMedia`] when unset.
    media: Option<Arc<dyn MediaDevice>>,
    /// Timeouts and retry limits.
    options: ClientOptions,
}

impl fmt::Debug for CallClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallClientBuilder")
            .field("server_url", &self.server_url)
            .field("user", &self.user)
            .field("has_media", &self.media.is_some())
            .field("options", &self.options)
            .finish()
    }
}

// ============================================================================
// CallClientBuilder Implementation
// ============================================================================

impl CallClientBuilder {
    /// Creates a new builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signaling server endpoint (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Sets the authenticated local user.
    #[inline]
    #[must_use]
    pub fn user(mut self, user: impl Into<UserId>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the media device driven by the call coordinator.
    #[inline]
    #[must_use]
    pub fn media(mut self, media: Arc<dyn MediaDevice>) -> Self {
        self.media = Some(media);
        self
    }

    /// Replaces the client options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the configuration, then connects.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL or user is missing or invalid
    /// - [`Error::Config`] if the options fail validation
    /// - [`Error::Connection`] / [`Error::ConnectionTimeout`] if the first
    ///   handshake fails
    pub async fn start(self) -> Result<CallClient> {
        let server_url = self.validate_url()?;
        let user = self.validate_user()?;
        self.options.validate()?;

        let media = self.media.unwrap_or_else(|| Arc::new(NullMedia));
        CallClient::start(server_url, user, media, self.options).await
    }
}

// ============================================================================
// Validation
// ============================================================================

impl CallClientBuilder {
    fn validate_url(&self) -> Result<Url> {
        let raw = self.server_url.as_deref().ok_or_else(|| {
            Error::config(
                "Signaling server URL is required. Use .server_url() to set it.\n\
                 Example: CallClient::builder().server_url(\"wss://signal.example.com/\")",
            )
        })?;

        let url = Url::parse(raw)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Signaling server URL must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }

        Ok(url)
    }

    fn validate_user(&self) -> Result<UserId> {
        let user = self.user.clone().ok_or_else(|| {
            Error::config(
                "Local user is required. Use .user() to set it.\n\
                 Example: CallClient::builder().user(\"alice\")",
            )
        })?;

        if user.is_blank() {
            return Err(Error::config("Local user id must not be blank"));
        }

        Ok(user)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = CallClientBuilder::new();
        assert!(builder.server_url.is_none());
        assert!(builder.user.is_none());
        assert!(builder.media.is_none());
        assert_eq!(builder.options, ClientOptions::default());
    }

    #[test]
    fn test_validate_url_requires_value() {
        let err = CallClientBuilder::new().validate_url().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_validate_url_rejects_http() {
        let err = CallClientBuilder::new()
            .server_url("http://example.com/")
            .validate_url()
            .unwrap_err();
        assert!(err.to_string().contains("ws://"));
    }

    #[test]
    fn test_validate_url_rejects_garbage() {
        let err = CallClientBuilder::new()
            .server_url("not a url")
            .validate_url()
            .unwrap_err();
        assert!(matches!(err, Error::Url(_)));
    }

    #[test]
    fn test_validate_url_accepts_wss() {
        let url = CallClientBuilder::new()
            .server_url("wss://signal.example.com/ws")
            .validate_url()
            .unwrap();
        assert_eq!(url.host_str(), Some("signal.example.com"));
    }

    #[test]
    fn test_validate_user() {
        assert!(CallClientBuilder::new().validate_user().is_err());
        assert!(CallClientBuilder::new().user("   ").validate_user().is_err());
        assert_eq!(
            CallClientBuilder::new().user("alice").validate_user().unwrap(),
            UserId::new("alice")
        );
    }

    #[tokio::test]
    async fn test_start_fails_fast_on_invalid_options() {
        let err = CallClientBuilder::new()
            .server_url("ws://127.0.0.1:9/")
            .user("alice")
            .options(ClientOptions::new().with_degraded_timeout(std::time::Duration::ZERO))
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
