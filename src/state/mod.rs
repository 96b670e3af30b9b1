//! State module for tracking vehicles across runs
//!
//! # Components
//!
//! - `VehicleStatus`: lifecycle of a tracked vehicle (active, unavailable)
//! - `StateManager`: serialized-write facade over the vehicle, checkpoint and
//!   run-history ledgers

mod manager;
mod vehicle_status;

pub use manager::StateManager;
pub use vehicle_status::VehicleStatus;
