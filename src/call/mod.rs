//! Call session state and coordination.
//!
//! - [`session`]: status, session and snapshot types
//! - [`machine`]: the pure transition function
//! - [`coordinator`]: the task that serializes inputs and runs effects

// ============================================================================
// Submodules
// ============================================================================

pub mod coordinator;
pub mod machine;
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use coordinator::{
    CallCoordinator, CoordinatorConfig, DEFAULT_DEGRADED_TIMEOUT, DEFAULT_RING_TIMEOUT,
};
pub use machine::{CallMachine, Command, Effect, Timer};
pub use session::{
    CallSession, CallSnapshot, CallStatus, CallWarning, Direction, EndReason, EndedCall,
};
