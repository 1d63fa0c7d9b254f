//! Connection management for a single BLE payload device
//!
//! This module handles:
//! - Scanning for peripherals advertising the target service
//! - Connecting and resolving the target characteristic
//! - Per-phase deadlines and rescans after a lost link
//! - Status reporting

mod manager;
mod status;

pub use manager::{ConnectionManager, ManagerConfig, TransitionTimeouts};
pub use status::StatusDisplay;
