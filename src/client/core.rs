//! Call client facade.
//!
//! A [`CallClient`] wires one [`ConnectionManager`] to one
//! [`CallCoordinator`] for a single authenticated user.
//!
//! # Startup Order
//!
//! 1. Create the connection manager (disconnected)
//! 2. Create the coordinator, which queues its signal listeners
//! 3. Connect; the queued listeners go live with the link
//!
//! No inbound signal can arrive before the coordinator is listening.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::call::{CallCoordinator, CallSnapshot, CallWarning};
use crate::error::Result;
use crate::identifiers::UserId;
use crate::media::MediaDevice;
use crate::protocol::MediaKind;
use crate::transport::{ConnectionManager, ManagerConfig};

use super::builder::CallClientBuilder;
use super::options::ClientOptions;

// ============================================================================
// CallClient
// ============================================================================

/// Signaling client for one user.
///
/// Cloning is cheap; clones share the connection and the call.
#[derive(Clone)]
pub struct CallClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    user: UserId,
    manager: ConnectionManager,
    coordinator: CallCoordinator,
}

impl fmt::Debug for CallClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallClient")
            .field("user", &self.inner.user)
            .field("connection", &self.inner.manager.state())
            .field("call", &self.inner.coordinator.snapshot().status)
            .finish()
    }
}

// ============================================================================
// CallClient - Construction
// ============================================================================

impl CallClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> CallClientBuilder {
        CallClientBuilder::new()
    }

    pub(crate) async fn start(
        server_url: Url,
        user: UserId,
        media: Arc<dyn MediaDevice>,
        options: ClientOptions,
    ) -> Result<Self> {
        let config = ManagerConfig {
            server_url,
            connect_timeout: options.connect_timeout,
            reconnect: options.reconnect_policy(),
        };
        let manager = ConnectionManager::new(config);
        let coordinator = CallCoordinator::new(
            user.clone(),
            manager.clone(),
            media,
            options.coordinator_config(),
        );

        if let Err(e) = manager.connect(user.clone()).await {
            coordinator.shutdown().await;
            return Err(e);
        }

        info!(user = %user, "Call client started");

        Ok(Self {
            inner: Arc::new(ClientInner {
                user,
                manager,
                coordinator,
            }),
        })
    }
}

// ============================================================================
// CallClient - Accessors
// ============================================================================

impl CallClient {
    /// Authenticated local user.
    #[inline]
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.inner.user
    }

    /// Underlying connection manager.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    /// Underlying call coordinator.
    #[inline]
    #[must_use]
    pub fn coordinator(&self) -> &CallCoordinator {
        &self.inner.coordinator
    }

    /// Returns `true` if the signaling link is up.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.manager.is_connected()
    }

    /// Current call snapshot.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.coordinator.snapshot()
    }

    /// Subscribes to call snapshots.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.coordinator.subscribe()
    }

    /// Subscribes to call warnings.
    #[inline]
    #[must_use]
    pub fn warnings(&self) -> broadcast::Receiver<CallWarning> {
        self.inner.coordinator.warnings()
    }
}

// ============================================================================
// CallClient - Call Operations
// ============================================================================

impl CallClient {
    /// See [`CallCoordinator::place_call`].
    ///
    /// # Errors
    ///
    /// Same as [`CallCoordinator::place_call`].
    pub async fn place_call(
        &self,
        remote: impl Into<UserId>,
        media_kind: MediaKind,
    ) -> Result<CallSnapshot> {
        self.inner.coordinator.place_call(remote, media_kind).await
    }

    /// See [`CallCoordinator::answer_call`].
    ///
    /// # Errors
    ///
    /// Same as [`CallCoordinator::answer_call`].
    pub async fn answer_call(&self) -> Result<CallSnapshot> {
        self.inner.coordinator.answer_call().await
    }

    /// See [`CallCoordinator::decline_call`].
    ///
    /// # Errors
    ///
    /// Same as [`CallCoordinator::decline_call`].
    pub async fn decline_call(&self) -> Result<CallSnapshot> {
        self.inner.coordinator.decline_call().await
    }

    /// See [`CallCoordinator::end_call`].
    ///
    /// # Errors
    ///
    /// Same as [`CallCoordinator::end_call`].
    pub async fn end_call(&self) -> Result<CallSnapshot> {
        self.inner.coordinator.end_call().await
    }

    /// See [`CallCoordinator::toggle_mute`].
    ///
    /// # Errors
    ///
    /// Same as [`CallCoordinator::toggle_mute`].
    pub async fn toggle_mute(&self) -> Result<CallSnapshot> {
        self.inner.coordinator.toggle_mute().await
    }

    /// See [`CallCoordinator::toggle_speaker`].
    ///
    /// # Errors
    ///
    /// Same as [`CallCoordinator::toggle_speaker`].
    pub async fn toggle_speaker(&self) -> Result<CallSnapshot> {
        self.inner.coordinator.toggle_speaker().await
    }
}

// ============================================================================
// CallClient - Lifecycle
// ============================================================================

impl CallClient {
    /// Ends any call, stops the coordinator and closes the link.
    pub async fn shutdown(&self) {
        debug!(user = %self.inner.user, "Shutting down call client");

        if let Err(e) = self.inner.coordinator.end_call().await {
            warn!(error = %e, "Failed to end call during shutdown");
        }
        self.inner.coordinator.shutdown().await;
        self.inner.manager.disconnect().await;

        info!(user = %self.inner.user, "Call client stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================
