//! Launching and reaping the plot worker.

use super::link::PlotLink;
use super::{worker, PlotWindow};
use crate::error::{AppResult, GalileoError};
use crate::protocol::{PlotCommand, PlotSetup};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{duplex, split};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const IN_PROCESS_PIPE: usize = 1 << 20;

/// How the worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Exited on its own within the timeout
    Exited,
    /// Had to be killed
    Killed,
}

/// A running plot worker.
#[derive(Debug)]
pub enum PlotHost {
    /// Child process speaking the protocol over stdin/stdout
    Process(Child),
    /// In-process task over an in-memory pipe
    Task(JoinHandle<AppResult<()>>),
}

impl PlotHost {
    /// Launches `<exe> plot-worker` and sends the setup frame.
    pub async fn spawn_process(
        exe: &Path,
        setup: &PlotSetup,
        log_level: &str,
    ) -> AppResult<(Self, PlotLink)> {
        let mut command = Command::new(exe);
        command.arg("plot-worker").arg("--log-level").arg(log_level);
        Self::spawn_command(command, setup).await
    }

    /// Launches an arbitrary worker command with piped stdin/stdout and sends
    /// the setup frame. The child is killed if the host is dropped.
    pub async fn spawn_command(mut command: Command, setup: &PlotSetup) -> AppResult<(Self, PlotLink)> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| GalileoError::PlotProcess(format!("Failed to launch plot worker: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GalileoError::PlotProcess("Plot worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GalileoError::PlotProcess("Plot worker stdout unavailable".into()))?;
        info!(pid = child.id(), "Plot worker launched");

        let link = PlotLink::spawn(stdout, stdin);
        link.send(PlotCommand::Hello(setup.clone())).await?;
        Ok((PlotHost::Process(child), link))
    }

    /// Runs the worker as a task in this runtime and sends the setup frame.
    pub async fn spawn_task<P>(setup: &PlotSetup, window: P) -> AppResult<(Self, PlotLink)>
    where
        P: PlotWindow + 'static,
    {
        let (ours, theirs) = duplex(IN_PROCESS_PIPE);
        let (their_read, their_write) = split(theirs);
        let (our_read, our_write) = split(ours);
        let handle = tokio::spawn(async move {
            let result = worker::run(their_read, their_write, window).await;
            if let Err(e) = &result {
                error!("Plot worker failed: {e}");
            }
            result
        });

        let link = PlotLink::spawn(our_read, our_write);
        link.send(PlotCommand::Hello(setup.clone())).await?;
        Ok((PlotHost::Task(handle), link))
    }

    /// Waits up to `wait` for the worker to end, then kills it.
    pub async fn join(self, wait: Duration) -> AppResult<JoinOutcome> {
        match self {
            PlotHost::Process(mut child) => match timeout(wait, child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    debug!(%status, "Plot worker exited");
                    Ok(JoinOutcome::Exited)
                }
                Err(_) => {
                    warn!("Plot worker did not exit within {wait:?}, killing it");
                    child.kill().await?;
                    Ok(JoinOutcome::Killed)
                }
            },
            PlotHost::Task(mut handle) => match timeout(wait, &mut handle).await {
                Ok(result) => {
                    result??;
                    Ok(JoinOutcome::Exited)
                }
                Err(_) => {
                    warn!("Plot worker did not exit within {wait:?}, aborting it");
                    handle.abort();
                    Ok(JoinOutcome::Killed)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::HeadlessWindow;
    use crate::protocol::AxisPair;

    fn setup() -> PlotSetup {
        PlotSetup {
            subplots: vec![vec![AxisPair {
                x: "t".into(),
                y: "T".into(),
                x_title: "t".into(),
                y_title: "T".into(),
            }]],
            refresh_interval: Duration::from_millis(5),
            listen_interval: Duration::from_millis(5),
            max_points: 100,
            initial_points: 8,
            downsample_ratio: 10,
            overrange: 0.05,
        }
    }

    #[tokio::test]
    async fn test_in_process_worker_quits_cleanly() {
        let (host, link) = PlotHost::spawn_task(&setup(), HeadlessWindow::new())
            .await
            .unwrap();
        assert!(link
            .request(PlotCommand::AutoscaleOff, Duration::from_secs(5))
            .await
            .unwrap());
        assert!(link
            .request(PlotCommand::Quit, Duration::from_secs(5))
            .await
            .unwrap());
        assert_eq!(
            host.join(Duration::from_secs(5)).await.unwrap(),
            JoinOutcome::Exited
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unresponsive_process_is_killed() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 60");
        let (host, link) = PlotHost::spawn_command(command, &setup()).await.unwrap();
        let acked = link
            .request(PlotCommand::Quit, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(!acked);
        assert_eq!(
            host.join(Duration::from_millis(100)).await.unwrap(),
            JoinOutcome::Killed
        );
    }
}
