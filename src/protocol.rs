//! Coordinator <-> plot worker wire protocol.
//!
//! Frames are single-line JSON documents, externally tagged, one per line:
//!
//! ```text
//! -> {"Hello":{"subplots":[[{"x":"t","y":"T",...}]],"refresh_interval":"500ms",...}}
//! -> {"Data":{"points":[[{"x":0.1,"y":299.9}]]}}
//! -> "Clear"
//! <- "Ready"
//! <- {"Done":"Clear"}
//! <- "WindowShown"
//! ```
//!
//! NaN and infinite coordinates travel as `null` and decode back to NaN.

use crate::error::{AppResult, GalileoError};
use crate::sample::{Sample, Schema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

/// One subplot's variable pair and axis titles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisPair {
    /// Variable on the horizontal axis
    pub x: String,
    /// Variable on the vertical axis
    pub y: String,
    /// Horizontal axis title
    pub x_title: String,
    /// Vertical axis title
    pub y_title: String,
}

/// Everything the worker needs before the first data frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSetup {
    /// Subplot grid, `[row][col]`
    pub subplots: Vec<Vec<AxisPair>>,
    /// Redraw cadence while a window is open
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Command drain / data request cadence
    #[serde(with = "humantime_serde")]
    pub listen_interval: Duration,
    /// Hard ceiling on buffered points per subplot
    pub max_points: usize,
    /// Initial buffer capacity
    pub initial_points: usize,
    /// Keep every k-th point on overflow
    pub downsample_ratio: usize,
    /// Fractional autoscale margin
    pub overrange: f64,
}

impl PlotSetup {
    /// Number of subplot rows.
    pub fn rows(&self) -> usize {
        self.subplots.len()
    }

    /// Number of subplot columns.
    pub fn cols(&self) -> usize {
        self.subplots.first().map_or(0, Vec::len)
    }
}

/// One (x, y) point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate
    #[serde(with = "nullable_f64")]
    pub x: f64,
    /// Vertical coordinate
    #[serde(with = "nullable_f64")]
    pub y: f64,
}

impl Point {
    /// Point at `(x, y)`.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// True if both coordinates are finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// The latest sample projected onto every subplot, `[row][col]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointBatch {
    /// Points, same shape as the subplot grid
    pub points: Vec<Vec<Point>>,
}

/// Control commands that are acknowledged with [`PlotEvent::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Control {
    /// Autoscale switched on
    AutoscaleOn,
    /// Autoscale switched off
    AutoscaleOff,
    /// Buffers truncated
    Clear,
    /// Worker exiting
    Quit,
}

/// Coordinator -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlotCommand {
    /// Layout and timing; always the first frame
    Hello(PlotSetup),
    /// One batch of points
    Data(PointBatch),
    /// Enable autoscaling
    AutoscaleOn,
    /// Disable autoscaling
    AutoscaleOff,
    /// Drop history except the last two points
    Clear,
    /// Open (or rebuild) the window
    Replot,
    /// Acquisition ended; keep the window
    Stop,
    /// Close the window and exit
    Quit,
}

impl PlotCommand {
    /// The acknowledgement this command expects, if any.
    pub fn expected_ack(&self) -> Option<Control> {
        match self {
            PlotCommand::AutoscaleOn => Some(Control::AutoscaleOn),
            PlotCommand::AutoscaleOff => Some(Control::AutoscaleOff),
            PlotCommand::Clear => Some(Control::Clear),
            PlotCommand::Quit => Some(Control::Quit),
            _ => None,
        }
    }
}

/// Worker -> coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlotEvent {
    /// Ready for the next data frame
    Ready,
    /// A control command was applied
    Done(Control),
    /// A window opened
    WindowShown,
    /// The window closed
    WindowClosed,
}

/// Maps each subplot to the sample positions of its variables.
#[derive(Debug, Clone)]
pub struct PlotLayout {
    positions: Vec<Vec<(usize, usize)>>,
}

impl PlotLayout {
    /// Resolves `setup` against `schema`.
    pub fn new(setup: &PlotSetup, schema: &Schema) -> AppResult<Self> {
        let position = |name: &str| {
            schema
                .position(name)
                .ok_or_else(|| GalileoError::UnknownVariable(name.to_string()))
        };
        let mut positions = Vec::with_capacity(setup.rows());
        for row in &setup.subplots {
            let mut cells = Vec::with_capacity(row.len());
            for pair in row {
                cells.push((position(&pair.x)?, position(&pair.y)?));
            }
            positions.push(cells);
        }
        Ok(Self { positions })
    }

    /// Projects `sample` onto the grid.
    pub fn extract(&self, sample: &Sample) -> PointBatch {
        let values = sample.values();
        let points = self
            .positions
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&(x, y)| Point::new(values[x], values[y]))
                    .collect()
            })
            .collect();
        PointBatch { points }
    }
}

/// Writes one frame and flushes.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads frames line by line.
pub struct FrameReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Next frame, or `None` at end of stream. Blank lines are skipped.
    pub async fn next<T: DeserializeOwned>(&mut self) -> AppResult<Option<T>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(line)?));
        }
        Ok(None)
    }
}

/// Serializes non-finite floats as `null`, and `null` back to NaN.
mod nullable_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
