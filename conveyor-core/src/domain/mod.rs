//! Core domain types
//!
//! This module contains the core domain structures used across Conveyor crates.
//! Definitions are immutable once loaded; run records are mutated by the runner
//! through checked state transitions only.

pub mod definition;
pub mod job;
pub mod log;
pub mod trigger;
pub mod workflow;
