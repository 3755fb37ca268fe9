//! Per-run notes file: provenance header plus timestamped operator notes.

use crate::error::AppResult;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Provenance written at the top of the notes file.
#[derive(Debug, Clone)]
pub struct RunHeader {
    /// Unique id of this run
    pub run_id: Uuid,
    /// Experiment title
    pub title: String,
    /// Host the run executes on
    pub host: String,
    /// Run start time
    pub started: DateTime<Local>,
    /// Effective configuration, serialized as TOML
    pub config: String,
}

impl RunHeader {
    /// Header for a run starting now on this host.
    pub fn new(title: &str, config: String, started: DateTime<Local>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            run_id: Uuid::new_v4(),
            title: title.to_string(),
            host,
            started,
            config,
        }
    }
}

/// Append-only notes file.
#[derive(Debug)]
pub struct Notebook {
    path: PathBuf,
}

impl Notebook {
    /// Creates (truncating) the notes file and writes `header`.
    pub fn create(path: &Path, header: &RunHeader) -> AppResult<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut file = File::create(path)?;
        writeln!(file, "# {}", header.title)?;
        writeln!(file, "run_id = {}", header.run_id)?;
        writeln!(file, "host = {}", header.host)?;
        writeln!(file, "started = {}", header.started.to_rfc3339())?;
        writeln!(file)?;
        writeln!(file, "## configuration")?;
        file.write_all(header.config.as_bytes())?;
        if !header.config.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file)?;
        writeln!(file, "## notes")?;
        file.flush()?;
        debug!(path = %path.display(), run_id = %header.run_id, "Notes file created");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Appends `[timestamp] text`. Multi-line text is kept on one line.
    pub fn append(&self, text: &str) -> AppResult<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let text = text.trim().replace(['\r', '\n'], " ");
        writeln!(file, "[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), text)?;
        Ok(())
    }

    /// Notes file location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
