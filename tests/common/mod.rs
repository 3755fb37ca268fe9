//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use galileo::error::{AppResult, GalileoError};
use galileo::experiment::Experiment;
use galileo::protocol::{
    write_frame, AxisPair, Control, FrameReader, PlotCommand, PlotEvent, PlotSetup,
};
use galileo::sample::{Sample, Schema, VariableSpec};
use galileo::storage::DataLogger;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, split};
use tokio::sync::mpsc as async_mpsc;

/// Schema with the tick counter, timestamp and one signal.
pub fn schema() -> Arc<Schema> {
    Schema::new(vec![
        VariableSpec::new("n"),
        VariableSpec::new("t"),
        VariableSpec::new("X"),
    ])
    .expect("valid schema")
}

/// One subplot of `X` against `n`.
pub fn setup() -> PlotSetup {
    PlotSetup {
        subplots: vec![vec![AxisPair {
            x: "n".into(),
            y: "X".into(),
            x_title: "n".into(),
            y_title: "X".into(),
        }]],
        refresh_interval: Duration::from_millis(10),
        listen_interval: Duration::from_millis(5),
        max_points: 1000,
        initial_points: 16,
        downsample_ratio: 10,
        overrange: 0.05,
    }
}

/// Counts ticks into `n`; optionally waits on a gate inside every `measure`
/// and fails on a chosen tick.
pub struct TestExperiment {
    schema: Arc<Schema>,
    n: u64,
    max_ticks: Option<u64>,
    fail_at: Option<u64>,
    entered: Option<async_mpsc::UnboundedSender<u64>>,
    gate: Option<mpsc::Receiver<()>>,
    finished: Arc<Mutex<bool>>,
}

impl TestExperiment {
    /// Perpetual, ungated.
    pub fn new() -> Self {
        Self {
            schema: schema(),
            n: 0,
            max_ticks: None,
            fail_at: None,
            entered: None,
            gate: None,
            finished: Arc::new(Mutex::new(false)),
        }
    }

    /// Ends the sequence after `max` ticks.
    pub fn with_max_ticks(mut self, max: u64) -> Self {
        self.max_ticks = Some(max);
        self
    }

    /// Fails `measure` on tick `n`.
    pub fn failing_at(mut self, n: u64) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Every `measure` reports its tick number, then blocks until the
    /// returned sender releases it.
    pub fn gated(mut self) -> (Self, async_mpsc::UnboundedReceiver<u64>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = async_mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        self.entered = Some(entered_tx);
        self.gate = Some(gate_rx);
        (self, entered_rx, gate_tx)
    }

    /// Set once `finish` has run.
    pub fn finished_flag(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.finished)
    }
}

impl Experiment for TestExperiment {
    fn title(&self) -> &str {
        "test"
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn start(&mut self) -> AppResult<()> {
        self.n = 0;
        Ok(())
    }

    fn advance(&mut self) -> bool {
        self.max_ticks.map_or(true, |max| self.n < max)
    }

    fn measure(&mut self, sample: &mut Sample) -> AppResult<()> {
        self.n += 1;
        if let Some(entered) = &self.entered {
            let _ = entered.send(self.n);
        }
        if let Some(gate) = &self.gate {
            gate.recv()
                .map_err(|_| GalileoError::Instrument("gate dropped".into()))?;
        }
        if Some(self.n) == self.fail_at {
            return Err(GalileoError::Instrument(format!("tick {} failed", self.n)));
        }
        sample.set("n", self.n as f64)?;
        sample.set("t", self.n as f64 * 1.0e-3)?;
        sample.set("X", (self.n as f64).sin())?;
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        *self.finished.lock().expect("lock") = true;
        Ok(())
    }
}

/// What a [`RecordingLogger`] saw.
#[derive(Debug, Default)]
pub struct LogRecord {
    pub started: bool,
    pub rows: Vec<f64>,
    pub finished: bool,
}

/// Records `n` of every logged sample.
pub struct RecordingLogger {
    record: Arc<Mutex<LogRecord>>,
}

impl RecordingLogger {
    pub fn new() -> (Self, Arc<Mutex<LogRecord>>) {
        let record = Arc::new(Mutex::new(LogRecord::default()));
        (
            Self {
                record: Arc::clone(&record),
            },
            record,
        )
    }
}

impl DataLogger for RecordingLogger {
    fn start(&mut self, _schema: &Schema) -> AppResult<()> {
        self.record.lock().expect("lock").started = true;
        Ok(())
    }

    fn log(&mut self, sample: &Sample) -> AppResult<()> {
        let n = sample.get("n").unwrap_or(f64::NAN);
        let mut record = self.record.lock().expect("lock");
        assert!(!record.finished, "row logged after finish");
        record.rows.push(n);
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        self.record.lock().expect("lock").finished = true;
        Ok(())
    }
}

/// A plot worker stand-in: records every command, acknowledges controls,
/// and never asks for data on its own.
pub struct FakeWorker {
    pub commands: Arc<Mutex<Vec<PlotCommand>>>,
}

impl FakeWorker {
    /// Starts the fake and returns the coordinator-side pipe halves.
    pub fn spawn() -> (
        Self,
        tokio::io::ReadHalf<tokio::io::DuplexStream>,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
        tokio::task::JoinHandle<AppResult<()>>,
    ) {
        let (ours, theirs) = duplex(1 << 20);
        let (their_read, mut their_write) = split(theirs);
        let (our_read, our_write) = split(ours);
        let commands = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&commands);
        let handle = tokio::spawn(async move {
            let mut frames = FrameReader::new(their_read);
            while let Some(command) = frames.next::<PlotCommand>().await? {
                seen.lock().expect("lock").push(command.clone());
                if let Some(ack) = command.expected_ack() {
                    write_frame(&mut their_write, &PlotEvent::Done(ack)).await?;
                    if ack == Control::Quit {
                        break;
                    }
                }
            }
            Ok(())
        });
        (Self { commands }, our_read, our_write, handle)
    }

    /// Number of `Data` frames received so far.
    pub fn data_frames(&self) -> usize {
        self.commands
            .lock()
            .expect("lock")
            .iter()
            .filter(|c| matches!(c, PlotCommand::Data(_)))
            .count()
    }

    /// `n` of each received data frame.
    pub fn data_ticks(&self) -> Vec<f64> {
        self.commands
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|c| match c {
                PlotCommand::Data(batch) => Some(batch.points[0][0].x),
                _ => None,
            })
            .collect()
    }

    /// True once a `Stop` frame arrived.
    pub fn saw_stop(&self) -> bool {
        self.commands
            .lock()
            .expect("lock")
            .iter()
            .any(|c| matches!(c, PlotCommand::Stop))
    }
}

/// Polls `condition` every millisecond for up to five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not met within 5 s");
}
