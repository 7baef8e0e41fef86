//! Step output types

use serde::{Deserialize, Serialize};

/// A single line of output produced by a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    /// Creates a line stamped with the current time
    pub fn now(stream: OutputStream, text: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            stream,
            text: text.into(),
        }
    }
}

/// Stream a line of output was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}
