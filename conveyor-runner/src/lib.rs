//! Conveyor runner
//!
//! The execution half of Conveyor: it turns trigger events into job runs and
//! executes them in isolated environments.
//!
//! Architecture:
//! - Configuration: engine settings from defaults and environment variables
//! - Environment: backends that provision one environment per job run
//! - Services: step execution and output streaming
//! - Dispatch: which workflows an event activates
//! - Scheduler: capacity admission and the job run lifecycle
//! - Engine: dispatch, schedule and wait in one call

pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod environment;
pub mod scheduler;
pub mod service;

pub use config::{BackendKind, EngineConfig};
pub use dispatch::{JobRunRequest, TriggerDispatcher, trigger_matches};
pub use engine::Engine;
pub use environment::{EnvironmentBackend, EnvironmentLease, create_backend};
pub use scheduler::{RunScheduler, Submission};
pub use service::{BufferedSink, OutputSink, OutputSource, TracingSink};
