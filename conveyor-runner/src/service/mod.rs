//! Service layer
//!
//! Services contain the business logic of a job run: executing its steps and
//! streaming their output.
//!
//! Services are trait-based to enable testing and dependency injection.

mod execution;
mod output;

// Re-export traits
pub use execution::ExecutionService;
pub use output::{OutputSink, OutputSource};

// Re-export implementations
pub use execution::StandardExecutionService;
pub use output::{BufferedSink, CapturedLine, TracingSink};
