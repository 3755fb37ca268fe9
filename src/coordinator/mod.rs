//! Session coordinator.
//!
//! Owns everything one run needs: the run state, the shared sample, the
//! acquisition task, the plot worker and the notes file. Shell commands map
//! one-to-one onto methods here. Each returns once its effect is visible
//! (state changed, task joined, acknowledgement received) or its bounded
//! wait has expired.

mod measurement;

pub use measurement::RunSummary;

use crate::config::{PlotWorkerMode, Settings};
use crate::error::{AppResult, GalileoError};
use crate::experiment::{Experiment, InstrumentExperiment};
use crate::plot::{HeadlessWindow, JoinOutcome, PlotHost, PlotLink};
use crate::protocol::{PlotCommand, PlotLayout, PlotSetup};
use crate::run_state::{RunControl, RunState, RunTransition};
use crate::sample::{Sample, Schema, SharedSample};
use crate::storage::{build_logger, DataLogger, LogWriter, Notebook, RunHeader};
use chrono::Local;
use measurement::{Measurement, PlotFeed};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Timing knobs for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Sleep between ticks
    pub interval: Duration,
    /// Bound on waiting for a plot command acknowledgement (quit excepted)
    pub ack_timeout: Duration,
    /// Bound on the whole quit: acknowledgement plus worker exit
    pub quit_timeout: Duration,
    /// Bound on waiting for a plot window to open
    pub startup_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            ack_timeout: Duration::from_secs(5),
            quit_timeout: Duration::from_secs(3),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

impl CoordinatorOptions {
    /// Options from loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: settings.measurement.interval,
            ack_timeout: settings.plot.ack_timeout,
            quit_timeout: settings.plot.quit_timeout,
            startup_timeout: settings.plot.startup_timeout,
        }
    }
}

/// Result of an operator command that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The command took effect
    Applied,
    /// The command was ignored or only partly took effect
    Warning(String),
}

impl Outcome {
    fn warning(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!("{message}");
        Outcome::Warning(message)
    }

    /// True for [`Outcome::Applied`].
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Run state
    pub state: RunState,
    /// Samples measured so far
    pub ticks: u64,
    /// Latest sample
    pub sample: Sample,
    /// Window status, `None` without a plot worker
    pub window_open: Option<bool>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state: {}, ticks: {}", self.state, self.ticks)?;
        match self.window_open {
            Some(true) => writeln!(f, ", plot window: open")?,
            Some(false) => writeln!(f, ", plot window: closed")?,
            None => writeln!(f, ", plotting disabled")?,
        }
        write!(f, "{}", self.sample)
    }
}

/// Experiment and logger waiting for `start`.
struct Pending {
    experiment: Box<dyn Experiment>,
    logger: Box<dyn DataLogger>,
}

/// One measurement session.
pub struct Coordinator {
    options: CoordinatorOptions,
    title: String,
    schema: Arc<Schema>,
    control: Arc<RunControl>,
    sample: SharedSample,
    ticks: Arc<AtomicU64>,
    pending: Option<Pending>,
    measurement: Option<JoinHandle<AppResult<RunSummary>>>,
    summary: Option<RunSummary>,
    plot: Option<(Arc<PlotLink>, PlotLayout)>,
    host: Option<PlotHost>,
    notebook: Option<Notebook>,
}

impl Coordinator {
    /// Session for `experiment`, logging through `logger`. No plot worker
    /// and no notes file until added.
    pub fn new(
        options: CoordinatorOptions,
        experiment: Box<dyn Experiment>,
        logger: Box<dyn DataLogger>,
    ) -> Self {
        let schema = experiment.schema();
        let title = experiment.title().to_string();
        Self {
            options,
            title,
            sample: Arc::new(RwLock::new(Sample::new(Arc::clone(&schema)))),
            schema,
            control: Arc::new(RunControl::new()),
            ticks: Arc::new(AtomicU64::new(0)),
            pending: Some(Pending { experiment, logger }),
            measurement: None,
            summary: None,
            plot: None,
            host: None,
            notebook: None,
        }
    }

    /// Attaches a running plot worker. `setup` must be the layout it was
    /// started with.
    pub fn with_plot(mut self, host: PlotHost, link: PlotLink, setup: &PlotSetup) -> AppResult<Self> {
        let layout = PlotLayout::new(setup, &self.schema)?;
        self.plot = Some((Arc::new(link), layout));
        self.host = Some(host);
        Ok(self)
    }

    /// Attaches the notes file.
    pub fn with_notebook(mut self, notebook: Notebook) -> Self {
        self.notebook = Some(notebook);
        self
    }

    /// Builds the whole session from settings: experiment, data files, notes
    /// file and plot worker.
    pub async fn from_settings(settings: &Settings) -> AppResult<Self> {
        let started = Local::now();
        let experiment = InstrumentExperiment::from_settings(settings)?;
        let (logger, files) = build_logger(&settings.storage, started)?;
        let mut coordinator = Coordinator::new(
            CoordinatorOptions::from_settings(settings),
            Box::new(experiment),
            logger,
        );

        if let Some(files) = files {
            let config = toml::to_string_pretty(settings).map_err(|e| {
                GalileoError::Configuration(format!("Cannot serialize the configuration: {e}"))
            })?;
            let header = RunHeader::new(&settings.measurement.title, config, started);
            info!(
                run_id = %header.run_id,
                data = %files.csv.display(),
                notes = %files.notes.display(),
                "Run files"
            );
            coordinator = coordinator.with_notebook(Notebook::create(&files.notes, &header)?);
        }

        if settings.plot.enabled {
            let setup = settings.plot.setup(&coordinator.schema)?;
            let (host, link) = match settings.plot.worker {
                PlotWorkerMode::Process => {
                    let exe = std::env::current_exe()?;
                    PlotHost::spawn_process(&exe, &setup, &settings.application.log_level).await?
                }
                PlotWorkerMode::InProcess => {
                    PlotHost::spawn_task(&setup, HeadlessWindow::new()).await?
                }
            };
            coordinator = coordinator.with_plot(host, link, &setup)?;
        }

        Ok(coordinator)
    }

    /// Experiment title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Sample schema.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Current run state.
    pub fn run_state(&self) -> RunState {
        self.control.get()
    }

    /// Receiver notified on every run-state change.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.control.subscribe()
    }

    /// Samples measured so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Plot link, if a worker is attached.
    pub fn plot_link(&self) -> Option<&Arc<PlotLink>> {
        self.plot.as_ref().map(|(link, _)| link)
    }

    /// Summary of the finished run, once joined.
    pub fn summary(&self) -> Option<RunSummary> {
        self.summary
    }

    /// Starts the experiment and the logger, then the acquisition task.
    ///
    /// A failure here closes whatever was opened and leaves the run stopped.
    pub async fn start(&mut self) -> AppResult<()> {
        let Some(Pending { experiment, logger }) = self.pending.take() else {
            return Err(GalileoError::InvalidTransition {
                from: self.control.get(),
                transition: RunTransition::Start,
            });
        };
        info!(title = %self.title, "Starting experiment");

        let (mut experiment, started) = tokio::task::spawn_blocking(move || {
            let mut experiment = experiment;
            let result = experiment.start();
            (experiment, result)
        })
        .await?;
        let mut writer = LogWriter::new(logger);
        let started = match started {
            Ok(()) => writer.start(Arc::clone(&self.schema)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            let closed = tokio::task::spawn_blocking(move || experiment.finish()).await;
            if let Ok(Err(close_err)) = closed {
                debug!("Closing after failed start: {close_err}");
            }
            let _ = writer.finish().await;
            let _ = self.control.apply(RunTransition::Stop);
            return Err(e);
        }

        self.control.apply(RunTransition::Start)?;
        let measurement = Measurement {
            control: Arc::clone(&self.control),
            sample: Arc::clone(&self.sample),
            ticks: Arc::clone(&self.ticks),
            interval: self.options.interval,
            plot: self.plot.as_ref().map(|(link, layout)| PlotFeed {
                link: Arc::clone(link),
                layout: layout.clone(),
            }),
            experiment: Some(experiment),
            writer,
            batches: 0,
        };
        self.measurement = Some(tokio::spawn(measurement.run()));
        Ok(())
    }

    fn transition(&self, transition: RunTransition) -> Outcome {
        match self.control.apply(transition) {
            Ok(state) => {
                info!(%state, "Run state changed");
                Outcome::Applied
            }
            Err(e) => Outcome::warning(e.to_string()),
        }
    }

    /// Suspends ticking.
    pub fn pause(&self) -> Outcome {
        self.transition(RunTransition::Pause)
    }

    /// Continues ticking after a pause.
    pub fn resume(&self) -> Outcome {
        self.transition(RunTransition::Resume)
    }

    /// Requests a stop and joins the acquisition task.
    ///
    /// An error the task ended with is returned here.
    pub async fn stop(&mut self) -> AppResult<Outcome> {
        let Some(handle) = self.measurement.take() else {
            if self.pending.take().is_some() {
                self.control.apply(RunTransition::Stop)?;
                return Ok(Outcome::Applied);
            }
            return Ok(Outcome::warning("Measurement already stopped"));
        };
        if let Err(e) = self.control.apply(RunTransition::Stop) {
            // The task ended on its own.
            debug!("{e}");
        }
        info!("Waiting for the measurement task");
        let summary = handle.await??;
        self.summary = Some(summary);
        Ok(Outcome::Applied)
    }

    /// Stops the run if needed, then shuts the plot worker down, killing it
    /// once the quit timeout has run out. The acknowledgement and the exit
    /// share that one deadline. Always completes the shutdown; a measurement
    /// error is returned afterwards.
    pub async fn quit(&mut self) -> AppResult<Outcome> {
        let stopped = self.stop().await;
        let mut warnings = Vec::new();
        let deadline = Instant::now() + self.options.quit_timeout;

        if let Some((link, _)) = self.plot.take() {
            match link.request(PlotCommand::Quit, self.options.quit_timeout).await {
                Ok(true) => debug!("Plot worker acknowledged quit"),
                Ok(false) => warnings.push("Plot worker did not acknowledge quit".to_string()),
                Err(e) => debug!("Plot worker already gone: {e}"),
            }
        }
        if let Some(host) = self.host.take() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match host.join(remaining).await {
                Ok(JoinOutcome::Exited) => {}
                Ok(JoinOutcome::Killed) => warnings.push(format!(
                    "Plot worker killed after {:?}",
                    self.options.quit_timeout
                )),
                Err(e) => warnings.push(format!("Plot worker ended with an error: {e}")),
            }
        }

        stopped?;
        info!("Session closed");
        if warnings.is_empty() {
            Ok(Outcome::Applied)
        } else {
            Ok(Outcome::warning(warnings.join("; ")))
        }
    }

    /// Asks the plot worker for a window and waits for it to appear.
    pub async fn replot(&self) -> Outcome {
        let Some((link, _)) = &self.plot else {
            return Outcome::warning("Plotting is disabled");
        };
        if link.window_open() {
            return Outcome::warning("Plot window is already open");
        }
        match link.replot(self.options.startup_timeout).await {
            Ok(true) => Outcome::Applied,
            Ok(false) => Outcome::warning(format!(
                "Plot window did not open within {:?}",
                self.options.startup_timeout
            )),
            Err(e) => Outcome::warning(e.to_string()),
        }
    }

    /// Switches plot autoscaling on or off.
    pub async fn autoscale(&self, on: bool) -> Outcome {
        let command = if on {
            PlotCommand::AutoscaleOn
        } else {
            PlotCommand::AutoscaleOff
        };
        self.plot_request(command, if on { "autoscale on" } else { "autoscale off" })
            .await
    }

    /// Drops the plot history except the last two points.
    pub async fn clear(&self) -> Outcome {
        self.plot_request(PlotCommand::Clear, "clear").await
    }

    async fn plot_request(&self, command: PlotCommand, name: &str) -> Outcome {
        let Some((link, _)) = &self.plot else {
            return Outcome::warning("Plotting is disabled");
        };
        match link.request(command, self.options.ack_timeout).await {
            Ok(true) => Outcome::Applied,
            Ok(false) => Outcome::warning(format!(
                "Plot worker did not acknowledge '{name}' within {:?}",
                self.options.ack_timeout
            )),
            Err(e) => Outcome::warning(e.to_string()),
        }
    }

    /// Appends a timestamped note to the notes file.
    pub fn note(&self, text: &str) -> Outcome {
        let Some(notebook) = &self.notebook else {
            return Outcome::warning("This run has no notes file");
        };
        if text.trim().is_empty() {
            return Outcome::warning("Nothing to note");
        }
        match notebook.append(text) {
            Ok(()) => Outcome::Applied,
            Err(e) => Outcome::warning(format!("Could not write note: {e}")),
        }
    }

    /// Run state, tick count, latest sample and window status.
    pub async fn status(&self) -> StatusReport {
        StatusReport {
            state: self.control.get(),
            ticks: self.ticks(),
            sample: self.sample.read().await.clone(),
            window_open: self.plot.as_ref().map(|(link, _)| link.window_open()),
        }
    }
}
