//! Conveyor Core
//!
//! Core types and abstractions for the Conveyor CI engine.
//!
//! This crate contains:
//! - Domain types: definitions (jobs, steps, workflows, triggers) and run records
//! - Schedule expressions: cron-like recurrence rules evaluated as pure functions
//! - DTOs: reports and run events handed to the outside world
//! - Error types shared by the loader and the runner

pub mod domain;
pub mod dto;
pub mod error;
pub mod schedule;
