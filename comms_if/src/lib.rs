//! # Communications interface crate.
//!
//! Provides all messages exchanged between the robot and the off-board AI, the wire format used
//! with the robot's equipment, and the networking abstractions used to move them.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Primitive sets sent from the AI to the robots
pub mod primitive;

/// Robot status reports and crash reports sent back to the AI
pub mod status;

/// Command and response definitions for equipment (like the power board)
pub mod eqpt;

/// Network module
pub mod net;
