//! Conveyor definition loading
//!
//! This crate reads the YAML definition document and produces a validated
//! [`DefinitionModel`]. It includes:
//! - Raw serde document types
//! - Timeout text parsing
//! - Conversion and validation into the domain model

pub mod document;
pub mod duration;
pub mod parser;

pub use parser::{load_definition, parse_definition};

pub use conveyor_core::domain::definition::DefinitionModel;
