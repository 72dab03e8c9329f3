//! Call client entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CallClient`] | Connection manager plus call coordinator for one user |
//! | [`CallClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Timeouts and reconnect limits |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

/// Client timeouts and retry limits.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::CallClientBuilder;
pub use core::CallClient;
pub use options::ClientOptions;
