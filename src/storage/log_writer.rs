//! Background log writes with at most one in flight.
//!
//! The logger is moved into the blocking pool for each write and handed back
//! when the write completes, so it is never shared. Submitting a new row first
//! waits for the previous one, which keeps rows in acquisition order.

use super::DataLogger;
use crate::error::{AppResult, GalileoError};
use crate::sample::{Sample, Schema};
use std::sync::Arc;
use tokio::task::JoinHandle;

type Pending = JoinHandle<(Box<dyn DataLogger>, AppResult<()>)>;

/// Owns a [`DataLogger`] and serializes writes to it.
pub struct LogWriter {
    logger: Option<Box<dyn DataLogger>>,
    pending: Option<Pending>,
    rows: u64,
}

impl LogWriter {
    /// Wraps `logger`.
    pub fn new(logger: Box<dyn DataLogger>) -> Self {
        Self {
            logger: Some(logger),
            pending: None,
            rows: 0,
        }
    }

    /// Rows whose write has completed.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// True while a write is outstanding.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    fn take_logger(&mut self) -> AppResult<Box<dyn DataLogger>> {
        self.logger.take().ok_or(GalileoError::LoggerLost)
    }

    /// Runs the logger's `start` (header) on the blocking pool.
    pub async fn start(&mut self, schema: Arc<Schema>) -> AppResult<()> {
        self.wait().await?;
        let mut logger = self.take_logger()?;
        let (logger, result) = tokio::task::spawn_blocking(move || {
            let result = logger.start(&schema);
            (logger, result)
        })
        .await?;
        self.logger = Some(logger);
        result
    }

    /// Waits for the outstanding write, if any, then starts writing `sample`.
    pub async fn submit(&mut self, sample: Sample) -> AppResult<()> {
        self.wait().await?;
        let mut logger = self.take_logger()?;
        self.pending = Some(tokio::task::spawn_blocking(move || {
            let result = logger.log(&sample);
            (logger, result)
        }));
        Ok(())
    }

    /// Waits for the outstanding write, if any, and returns its result.
    pub async fn wait(&mut self) -> AppResult<()> {
        let Some(handle) = self.pending.take() else {
            return Ok(());
        };
        let (logger, result) = handle.await?;
        self.logger = Some(logger);
        if result.is_ok() {
            self.rows += 1;
        }
        result
    }

    /// Drains the outstanding write, then flushes and closes the logger.
    ///
    /// The logger is closed even when the drained write failed; the first
    /// error is returned.
    pub async fn finish(&mut self) -> AppResult<()> {
        let drained = self.wait().await;
        let finished = match self.logger.take() {
            Some(mut logger) => {
                let (logger, result) = tokio::task::spawn_blocking(move || {
                    let result = logger.finish();
                    (logger, result)
                })
                .await?;
                self.logger = Some(logger);
                result
            }
            None => Err(GalileoError::LoggerLost),
        };
        drained.and(finished)
    }
}
