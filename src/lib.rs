//! Deterministic multi-agent driving simulator
//!
//! Loads a recorded traffic scene, lets a policy drive a subset of its
//! vehicles and scores them against the recorded references.
//!
//! # Features
//!
//! - `render` - bincode encoding of render snapshots (enabled by default)

pub mod config;
pub mod sim;
pub mod util;
