//! Data Transfer Objects
//!
//! Lightweight records handed from the runner to its callers: status change
//! notifications while runs progress, and the final report once a workflow
//! run is complete.

pub mod event;
pub mod report;
