//! Data loggers and run files.
//!
//! A [`DataLogger`] receives one copy of the sample per tick, in acquisition
//! order. Loggers are synchronous; [`LogWriter`] runs them on the blocking
//! pool with at most one write in flight.

use crate::config::{StorageBackend, StorageSettings};
use crate::error::{AppResult, GalileoError};
use crate::sample::{Sample, Schema};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod log_writer;
mod notes;

pub use log_writer::LogWriter;
pub use notes::{Notebook, RunHeader};

/// Receives samples.
pub trait DataLogger: Send + 'static {
    /// Opens the destination and writes the header.
    fn start(&mut self, schema: &Schema) -> AppResult<()>;

    /// Appends one row.
    fn log(&mut self, sample: &Sample) -> AppResult<()>;

    /// Flushes and closes.
    fn finish(&mut self) -> AppResult<()>;
}

impl<L: DataLogger + ?Sized> DataLogger for Box<L> {
    fn start(&mut self, schema: &Schema) -> AppResult<()> {
        (**self).start(schema)
    }

    fn log(&mut self, sample: &Sample) -> AppResult<()> {
        (**self).log(sample)
    }

    fn finish(&mut self) -> AppResult<()> {
        (**self).finish()
    }
}

/// Discards everything (dry runs).
#[derive(Debug, Default)]
pub struct NullLogger;

impl DataLogger for NullLogger {
    fn start(&mut self, _schema: &Schema) -> AppResult<()> {
        Ok(())
    }

    fn log(&mut self, _sample: &Sample) -> AppResult<()> {
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// File locations for one run: `<dir>/<YYYYmmdd_HHMMSS>_<stem>.csv` plus a
/// `.notes.txt` companion with the same prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFiles {
    /// Data file
    pub csv: PathBuf,
    /// Notes file
    pub notes: PathBuf,
}

impl RunFiles {
    /// Paths for a run started at `started`.
    pub fn new(directory: &Path, stem: &str, started: DateTime<Local>) -> Self {
        let prefix = format!("{}_{}", started.format("%Y%m%d_%H%M%S"), stem);
        Self {
            csv: directory.join(format!("{prefix}.csv")),
            notes: directory.join(format!("{prefix}.notes.txt")),
        }
    }
}

/// Builds the configured logger. Returns the run files when the backend
/// writes any.
pub fn build_logger(
    settings: &StorageSettings,
    started: DateTime<Local>,
) -> AppResult<(Box<dyn DataLogger>, Option<RunFiles>)> {
    match settings.backend {
        StorageBackend::None => Ok((Box::new(NullLogger), None)),
        StorageBackend::Csv => {
            let files = RunFiles::new(&settings.directory, &settings.file_stem, started);
            let logger = CsvLogger::new(files.csv.clone(), settings.save_interval);
            Ok((Box::new(logger), Some(files)))
        }
    }
}

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::File;
    use std::time::Instant;
    use tracing::{debug, info};

    /// Writes one CSV row per sample, flushing every `save_interval`.
    pub struct CsvLogger {
        path: PathBuf,
        save_interval: Duration,
        writer: Option<csv::Writer<File>>,
        last_flush: Instant,
        rows: u64,
    }

    impl CsvLogger {
        /// Logger writing to `path` (created, with parent directories, on `start`).
        pub fn new(path: PathBuf, save_interval: Duration) -> Self {
            Self {
                path,
                save_interval,
                writer: None,
                last_flush: Instant::now(),
                rows: 0,
            }
        }

        /// Destination file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Rows written so far.
        pub fn rows(&self) -> u64 {
            self.rows
        }
    }

    impl DataLogger for CsvLogger {
        fn start(&mut self, schema: &Schema) -> AppResult<()> {
            if let Some(dir) = self.path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
            let mut writer = csv::Writer::from_path(&self.path)?;
            writer.write_record(schema.variables().iter().map(|v| v.display_title()))?;
            writer.flush()?;
            self.writer = Some(writer);
            self.last_flush = Instant::now();
            info!(path = %self.path.display(), "CSV logger started");
            Ok(())
        }

        fn log(&mut self, sample: &Sample) -> AppResult<()> {
            let writer = self.writer.as_mut().ok_or_else(|| {
                GalileoError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "CSV logger is not started",
                ))
            })?;
            writer.write_record(sample.formatted_row())?;
            self.rows += 1;
            if self.last_flush.elapsed() >= self.save_interval {
                writer.flush()?;
                self.last_flush = Instant::now();
                debug!(rows = self.rows, "CSV file flushed");
            }
            Ok(())
        }

        fn finish(&mut self) -> AppResult<()> {
            if let Some(mut writer) = self.writer.take() {
                writer.flush()?;
                info!(path = %self.path.display(), rows = self.rows, "CSV logger finished");
            }
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    /// Placeholder; CSV output is compiled out.
    pub struct CsvLogger;

    impl CsvLogger {
        /// Always builds; `start` reports the missing feature.
        pub fn new(_path: PathBuf, _save_interval: Duration) -> Self {
            Self
        }
    }

    impl DataLogger for CsvLogger {
        fn start(&mut self, _schema: &Schema) -> AppResult<()> {
            Err(GalileoError::FeatureNotEnabled("storage_csv".to_string()))
        }

        fn log(&mut self, _sample: &Sample) -> AppResult<()> {
            Err(GalileoError::FeatureNotEnabled("storage_csv".to_string()))
        }

        fn finish(&mut self) -> AppResult<()> {
            Ok(())
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvLogger;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvLogger;
