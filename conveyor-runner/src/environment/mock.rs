//! Scripted in-memory backend for tests
//!
//! Commands are looked up in a script table instead of being executed.
//! Anything not scripted exits 0 without output. The backend counts releases
//! per run and can hold commands until a gate is opened.

use async_trait::async_trait;
use conveyor_core::domain::definition::EnvironmentSpec;
use conveyor_core::domain::job::JobRunId;
use conveyor_core::domain::log::{OutputLine, OutputStream};
use conveyor_core::error::EnvironmentError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, oneshot};

use super::{EnvironmentBackend, EnvironmentHandle, RunningCommand};

/// Behaviour of one scripted command
#[derive(Clone)]
pub enum Script {
    /// Print `lines` then exit with `code`
    Exit { lines: Vec<String>, code: i32 },

    /// Print one line every `every`, then exit with `code`
    Drip {
        lines: Vec<String>,
        every: Duration,
        code: i32,
    },

    /// Wait for the gate to open, then exit with `code`
    Gated { gate: Arc<Semaphore>, code: i32 },

    /// Never finishes unless killed
    Hang,

    /// `exec` itself fails
    ExecError(String),
}

impl Script {
    pub fn exit(code: i32) -> Self {
        Script::Exit {
            lines: Vec::new(),
            code,
        }
    }

    pub fn print(lines: &[&str], code: i32) -> Self {
        Script::Exit {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            code,
        }
    }
}

/// A gate that scripted commands can wait on
pub fn gate() -> Arc<Semaphore> {
    Arc::new(Semaphore::new(0))
}

/// Lets every current and future waiter on `gate` through
pub fn open(gate: &Semaphore) {
    gate.add_permits(Semaphore::MAX_PERMITS / 2);
}

#[derive(Default)]
struct State {
    acquired: Vec<JobRunId>,
    releases: HashMap<JobRunId, usize>,
    commands: Vec<String>,
    killed: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    acquire_error: Option<String>,
    state: Arc<Mutex<State>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, command: &str, script: Script) -> Self {
        self.scripts.insert(command.to_string(), script);
        self
    }

    pub fn failing_acquire(mut self, reason: &str) -> Self {
        self.acquire_error = Some(reason.to_string());
        self
    }

    /// Run ids in the order their environments were acquired
    pub fn acquired(&self) -> Vec<JobRunId> {
        self.state.lock().unwrap().acquired.clone()
    }

    pub fn releases(&self, run_id: JobRunId) -> usize {
        self.state
            .lock()
            .unwrap()
            .releases
            .get(&run_id)
            .copied()
            .unwrap_or(0)
    }

    /// Commands in the order they were executed
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.state.lock().unwrap().killed.clone()
    }
}

#[async_trait]
impl EnvironmentBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn acquire(
        &self,
        run_id: JobRunId,
        spec: &EnvironmentSpec,
    ) -> Result<EnvironmentHandle, EnvironmentError> {
        if let Some(reason) = &self.acquire_error {
            return Err(EnvironmentError::Provision {
                image: spec.image.clone(),
                reason: reason.clone(),
            });
        }

        self.state.lock().unwrap().acquired.push(run_id);

        Ok(EnvironmentHandle {
            id: format!("scripted-{}", run_id),
            run_id,
            image: spec.image.clone(),
            working_directory: PathBuf::from(&spec.working_directory),
            variables: spec.variables.clone(),
        })
    }

    async fn exec(
        &self,
        handle: &EnvironmentHandle,
        command: &str,
    ) -> Result<RunningCommand, EnvironmentError> {
        self.state.lock().unwrap().commands.push(command.to_string());

        let script = self
            .scripts
            .get(command)
            .cloned()
            .unwrap_or_else(|| Script::exit(0));

        if let Script::ExecError(reason) = script {
            return Err(EnvironmentError::Exec {
                environment: handle.id.clone(),
                reason,
            });
        }

        let (line_tx, line_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let state = Arc::clone(&self.state);
        let command = command.to_string();

        tokio::spawn(async move {
            let run = async move {
                match script {
                    Script::Exit { lines, code } => {
                        for line in lines {
                            let _ = line_tx.send(OutputLine::now(OutputStream::Stdout, line)).await;
                        }
                        code
                    }
                    Script::Drip { lines, every, code } => {
                        for line in lines {
                            tokio::time::sleep(every).await;
                            let _ = line_tx.send(OutputLine::now(OutputStream::Stdout, line)).await;
                        }
                        code
                    }
                    Script::Gated { gate, code } => {
                        if let Ok(permit) = gate.acquire().await {
                            permit.forget();
                        }
                        code
                    }
                    Script::Hang | Script::ExecError(_) => std::future::pending::<i32>().await,
                }
            };

            tokio::select! {
                code = run => {
                    let _ = exit_tx.send(Ok(code));
                }
                Ok(()) = kill_rx => {
                    state.lock().unwrap().killed.push(command);
                    let _ = exit_tx.send(Ok(-1));
                }
            }
        });

        Ok(RunningCommand::new(line_rx, exit_rx, kill_tx))
    }

    async fn release(&self, handle: &EnvironmentHandle) -> Result<(), EnvironmentError> {
        *self
            .state
            .lock()
            .unwrap()
            .releases
            .entry(handle.run_id)
            .or_insert(0) += 1;
        Ok(())
    }
}
