//! # Robot library.
//!
//! This library allows other crates in the workspace to access items defined inside the robot
//! crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Single slot, last-write-wins hand-off between two threads
pub mod handoff;

/// Power board service - runs the serial link to the power board on its own thread
pub mod power;

/// Motor service seam, plus the service used when no motor board is fitted
pub mod motor;

/// Network service - receives primitive sets and sends robot statuses
pub mod network;

/// The fixed frequency control loop
pub mod thunderloop;

/// Crash handling - safes peripherals and broadcasts a crash report on fatal signals
pub mod crash;

/// Telemetry server - publishes a compact view of every cycle on a zmq socket
pub mod telemetry;

/// Per-cycle data of the control loop
pub mod data_store;

/// Parameters for the robot executable
pub mod params;
