//! Output sinks
//!
//! Step output is recorded on the job run and, while the step is running,
//! forwarded to an [`OutputSink`] so callers can stream it.

use conveyor_core::domain::job::{JobRunId, StepResult};
use conveyor_core::domain::log::OutputLine;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Where a line of output came from
#[derive(Debug, Clone, Copy)]
pub struct OutputSource<'a> {
    pub run_id: JobRunId,
    pub workflow: &'a str,
    pub job: &'a str,
    pub step: &'a str,
}

/// Receives step output as it is produced
///
/// Implementations must be cheap: they are called inline by the step
/// executor for every line.
pub trait OutputSink: Send + Sync {
    /// A step is about to start
    fn step_started(&self, _source: &OutputSource<'_>) {}

    /// A line of output was produced
    fn write(&self, source: &OutputSource<'_>, line: &OutputLine);

    /// A step finished, successfully or not
    fn step_finished(&self, _source: &OutputSource<'_>, _result: &StepResult) {}
}

/// Sink that forwards output to `tracing` at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn write(&self, source: &OutputSource<'_>, line: &OutputLine) {
        debug!(
            "[{}/{}] {}: {}",
            source.job, source.step, line.stream, line.text
        );
    }
}

/// A captured line with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLine {
    pub run_id: JobRunId,
    pub job: String,
    pub step: String,
    pub line: OutputLine,
}

/// In-memory sink
///
/// Uses Arc<Mutex<Vec<..>>> for thread-safe access across tasks.
#[derive(Clone, Default)]
pub struct BufferedSink {
    buffer: Arc<Mutex<Vec<CapturedLine>>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains all captured lines
    pub fn drain(&self) -> Vec<CapturedLine> {
        match self.buffer.lock() {
            Ok(mut buffer) => buffer.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }
}

impl OutputSink for BufferedSink {
    fn write(&self, source: &OutputSource<'_>, line: &OutputLine) {
        let captured = CapturedLine {
            run_id: source.run_id,
            job: source.job.to_string(),
            step: source.step.to_string(),
            line: line.clone(),
        };

        match self.buffer.lock() {
            Ok(mut buffer) => buffer.push(captured),
            Err(poisoned) => poisoned.into_inner().push(captured),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::log::OutputStream;
    use uuid::Uuid;

    #[test]
    fn test_buffered_sink_drain() {
        let sink = BufferedSink::new();
        let source = OutputSource {
            run_id: Uuid::new_v4(),
            workflow: "commit",
            job: "unit",
            step: "test",
        };

        sink.write(&source, &OutputLine::now(OutputStream::Stdout, "one"));
        sink.write(&source, &OutputLine::now(OutputStream::Stderr, "two"));

        let lines = sink.drain();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line.text, "one");
        assert_eq!(lines[1].step, "test");
        assert!(sink.drain().is_empty());
    }
}
