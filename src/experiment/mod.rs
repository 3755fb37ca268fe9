//! Experiment definitions.
//!
//! An [`Experiment`] owns its drivers and knows how to turn one tick into one
//! filled [`Sample`]. Every hook may block on instrument I/O; the measurement
//! loop moves the experiment into the blocking pool for each call and takes it
//! back afterwards.
//!
//! ```text
//! start ──> (advance ─> measure)* ──> finish
//! ```

use crate::error::AppResult;
use crate::sample::{Sample, Schema};
use std::sync::Arc;

mod instrument;

pub use instrument::InstrumentExperiment;

/// One measurement procedure.
pub trait Experiment: Send + 'static {
    /// Title shown at start and written to the notes file.
    fn title(&self) -> &str;

    /// Variables this experiment fills, in CSV column order.
    fn schema(&self) -> Arc<Schema>;

    /// Connects drivers and resets counters. Called once before the first tick.
    fn start(&mut self) -> AppResult<()>;

    /// Moves the sequence on by one step. Returns `false` when the sequence is
    /// exhausted, which ends the run. Perpetual by default.
    fn advance(&mut self) -> bool {
        true
    }

    /// Reads every driver into `sample`.
    fn measure(&mut self, sample: &mut Sample) -> AppResult<()>;

    /// Closes driver handles. Called once, also after a failed tick.
    fn finish(&mut self) -> AppResult<()>;
}

impl<E: Experiment + ?Sized> Experiment for Box<E> {
    fn title(&self) -> &str {
        (**self).title()
    }

    fn schema(&self) -> Arc<Schema> {
        (**self).schema()
    }

    fn start(&mut self) -> AppResult<()> {
        (**self).start()
    }

    fn advance(&mut self) -> bool {
        (**self).advance()
    }

    fn measure(&mut self, sample: &mut Sample) -> AppResult<()> {
        (**self).measure(sample)
    }

    fn finish(&mut self) -> AppResult<()> {
        (**self).finish()
    }
}
