//! The acquisition task: one sample per tick until stopped or exhausted.

use crate::error::{AppResult, GalileoError};
use crate::experiment::Experiment;
use crate::plot::PlotLink;
use crate::protocol::{PlotCommand, PlotLayout};
use crate::run_state::{RunControl, RunState, RunTransition};
use crate::sample::{Sample, SharedSample};
use crate::storage::LogWriter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// What a finished run produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Samples measured
    pub ticks: u64,
    /// Data frames handed to the plot worker
    pub batches: u64,
    /// Rows the logger accepted
    pub rows: u64,
}

/// Plot link plus the projection of a sample onto its subplots.
pub(crate) struct PlotFeed {
    pub link: Arc<PlotLink>,
    pub layout: PlotLayout,
}

/// State owned by the acquisition task.
pub(crate) struct Measurement {
    pub control: Arc<RunControl>,
    pub sample: SharedSample,
    pub ticks: Arc<AtomicU64>,
    pub interval: Duration,
    pub plot: Option<PlotFeed>,
    pub experiment: Option<Box<dyn Experiment>>,
    pub writer: LogWriter,
    pub batches: u64,
}

impl Measurement {
    /// Ticks until stopped, exhausted or failed, then shuts down. The first
    /// error wins; shutdown runs regardless.
    #[instrument(name = "measurement", skip_all)]
    pub async fn run(mut self) -> AppResult<RunSummary> {
        let ticked = self.tick_loop().await;
        if let Err(e) = &ticked {
            error!("Measurement failed: {e}");
        }
        let shut_down = self.shutdown().await;
        ticked?;
        shut_down?;
        let summary = RunSummary {
            ticks: self.ticks.load(Ordering::SeqCst),
            batches: self.batches,
            rows: self.writer.rows(),
        };
        info!(
            ticks = summary.ticks,
            rows = summary.rows,
            batches = summary.batches,
            "Measurement finished"
        );
        Ok(summary)
    }

    async fn tick_loop(&mut self) -> AppResult<()> {
        let mut state = self.control.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                RunState::Stopping | RunState::Stopped => break,
                RunState::Paused => {
                    tokio::select! {
                        _ = sleep(self.interval) => {}
                        _ = state.changed() => {}
                    }
                    continue;
                }
                RunState::Idle | RunState::Running => {}
            }

            // Readiness counts only if it was pending when the tick began.
            let ready = self.plot.as_ref().is_some_and(|feed| feed.link.take_ready());

            let template = self.sample.read().await.clone();
            let Some(sample) = self.measure(template).await? else {
                info!("Experiment sequence exhausted");
                break;
            };
            *self.sample.write().await = sample.clone();
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(tick, "Sample acquired");

            let batch = self
                .plot
                .as_ref()
                .filter(|_| ready)
                .map(|feed| feed.layout.extract(&sample));
            self.writer.submit(sample).await?;
            if let (Some(feed), Some(batch)) = (&self.plot, batch) {
                if feed.link.send_data(batch) {
                    self.batches += 1;
                }
            }

            if state.borrow().is_terminal() {
                break;
            }
            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = state.changed() => {}
            }
        }
        Ok(())
    }

    /// Advances and measures on the blocking pool. `None` means the
    /// sequence is exhausted.
    async fn measure(&mut self, mut sample: Sample) -> AppResult<Option<Sample>> {
        let mut experiment = self.experiment.take().ok_or_else(|| {
            GalileoError::Instrument("Experiment lost after a failed tick".into())
        })?;
        let (experiment, result) = tokio::task::spawn_blocking(move || {
            if !experiment.advance() {
                return (experiment, Ok(None));
            }
            let result = experiment.measure(&mut sample).map(|()| Some(sample));
            (experiment, result)
        })
        .await?;
        self.experiment = Some(experiment);
        result
    }

    /// Drains and closes the logger, closes the experiment, tells the plot
    /// worker acquisition is over and publishes `Stopped`.
    async fn shutdown(&mut self) -> AppResult<()> {
        let logged = self.writer.finish().await;
        if let Err(e) = &logged {
            error!("Closing the data logger failed: {e}");
        }

        let finished = match self.experiment.take() {
            Some(mut experiment) => tokio::task::spawn_blocking(move || experiment.finish())
                .await
                .map_err(GalileoError::from)
                .and_then(|result| result),
            None => Ok(()),
        };
        if let Err(e) = &finished {
            error!("Experiment finish failed: {e}");
        }

        if let Some(feed) = &self.plot {
            // A worker that stopped reading must not hold the shutdown.
            if !feed.link.try_send(PlotCommand::Stop) {
                warn!("Plot worker not told about the stop: command queue full or closed");
            }
        }

        if let Err(e) = self.control.apply(RunTransition::Finish) {
            warn!("{e}");
        }
        logged.and(finished)
    }
}
