//! Streaming child processes
//!
//! Spawns a command with piped stdout/stderr and turns it into a
//! [`RunningCommand`]: every line is forwarded as an [`OutputLine`] while the
//! process runs, and the exit code is delivered once the process has exited
//! and its output is drained.
//!
//! Each command leads its own process group. When the command exits or is
//! killed, the rest of the group is killed too, so nothing a step started in
//! the background outlives the step.

use conveyor_core::domain::log::{OutputLine, OutputStream};
use conveyor_core::error::EnvironmentError;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::RunningCommand;

const OUTPUT_CHANNEL_SIZE: usize = 256;

/// How long output readers may keep draining after the process exited
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Spawns `command` and streams its output
pub fn spawn_streaming(mut command: Command) -> Result<RunningCommand, EnvironmentError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let group = child.id();

    let (line_tx, line_rx) = mpsc::channel(OUTPUT_CHANNEL_SIZE);
    let (exit_tx, exit_rx) = oneshot::channel();
    let (kill_tx, kill_rx) = oneshot::channel::<()>();

    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(forward_lines(out, OutputStream::Stdout, line_tx.clone())));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(forward_lines(err, OutputStream::Stderr, line_tx)));

    tokio::spawn(async move {
        let (status, killed) = tokio::select! {
            status = child.wait() => (status, false),
            Ok(()) = kill_rx => {
                if let Some(group) = group {
                    kill_group(group);
                }
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill process: {}", e);
                }
                (child.wait().await, true)
            }
        };

        // Background children would outlive the step and hold the pipes open
        if let Some(group) = group {
            kill_group(group);
        }

        let readers: Vec<JoinHandle<()>> = [stdout, stderr].into_iter().flatten().collect();
        if killed {
            readers.iter().for_each(JoinHandle::abort);
        } else {
            drain(readers).await;
        }

        let result = status
            .map(|status| status.code().unwrap_or(-1))
            .map_err(EnvironmentError::from);

        debug!("Process finished: {:?}", result);
        let _ = exit_tx.send(result);
    });

    Ok(RunningCommand::new(line_rx, exit_rx, kill_tx))
}

/// Sends SIGKILL to every process of the group led by `leader`
fn kill_group(leader: u32) {
    let Ok(pid) = i32::try_from(leader) else {
        return;
    };

    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
    }
}

/// Waits for the readers to reach end of output, aborting them after the drain window
async fn drain(readers: Vec<JoinHandle<()>>) {
    let aborts: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();
    let joined = join_readers(readers);

    if tokio::time::timeout(DRAIN_WINDOW, joined).await.is_err() {
        warn!("Output still open {:?} after exit, closing it", DRAIN_WINDOW);
        aborts.iter().for_each(|abort| abort.abort());
    }
}

async fn join_readers(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        if let Err(e) = reader.await {
            warn!("Output reader task failed: {}", e);
        }
    }
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(text)) => {
                if tx.send(OutputLine::now(stream, text)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read {}: {}", stream, e);
                break;
            }
        }
    }
}
