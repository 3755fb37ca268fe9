//! Point history for the live plot.
//!
//! Every subplot receives one point per data frame, so all series share one
//! length. Capacity doubles from the initial size up to a hard ceiling; at the
//! ceiling the history is down-sampled to every k-th point, always keeping the
//! oldest and newest.

use crate::error::{AppResult, GalileoError};
use crate::protocol::PointBatch;
use tracing::debug;

/// Keeps degenerate (single-value) ranges non-empty.
pub const SMALL: f64 = 1.0e-9;

/// Running min/max of the finite points of one subplot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrema {
    /// Smallest x
    pub x_min: f64,
    /// Largest x
    pub x_max: f64,
    /// Smallest y
    pub y_min: f64,
    /// Largest y
    pub y_max: f64,
}

impl Default for Extrema {
    fn default() -> Self {
        Self {
            x_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_min: f64::INFINITY,
            y_max: f64::NEG_INFINITY,
        }
    }
}

impl Extrema {
    /// Widens to include `[x, y]`; non-finite points are ignored.
    pub fn include(&mut self, [x, y]: [f64; 2]) {
        if !(x.is_finite() && y.is_finite()) {
            return;
        }
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
    }

    /// Extrema of `points`.
    pub fn of(points: &[[f64; 2]]) -> Self {
        let mut extrema = Self::default();
        for &p in points {
            extrema.include(p);
        }
        extrema
    }

    /// True until a finite point has been included.
    pub fn is_empty(&self) -> bool {
        self.x_min > self.x_max
    }
}

/// Visible axis ranges of one subplot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    /// `(lower, upper)` on x
    pub x: (f64, f64),
    /// `(lower, upper)` on y
    pub y: (f64, f64),
}

impl Default for AxisLimits {
    /// Inverted ranges, so the first data always lies outside them.
    fn default() -> Self {
        Self {
            x: (1.0, -1.0),
            y: (1.0, -1.0),
        }
    }
}

impl AxisLimits {
    /// Limits enclosing `extrema` with a fractional margin on each side.
    pub fn around(extrema: &Extrema, overrange: f64) -> Self {
        let dx = overrange * (extrema.x_max - extrema.x_min + SMALL);
        let dy = overrange * (extrema.y_max - extrema.y_min + SMALL);
        Self {
            x: (extrema.x_min - dx, extrema.x_max + dx),
            y: (extrema.y_min - dy, extrema.y_max + dy),
        }
    }

    /// True if `extrema` lies inside these limits. Empty extrema always fit.
    pub fn contains(&self, extrema: &Extrema) -> bool {
        extrema.is_empty()
            || (extrema.x_min >= self.x.0
                && extrema.x_max <= self.x.1
                && extrema.y_min >= self.y.0
                && extrema.y_max <= self.y.1)
    }
}

/// Growable, down-sampling point history for a grid of subplots.
#[derive(Debug, Clone)]
pub struct PlotBuffer {
    rows: usize,
    cols: usize,
    series: Vec<Vec<[f64; 2]>>,
    extrema: Vec<Extrema>,
    capacity: usize,
    max_points: usize,
    downsample_ratio: usize,
}

impl PlotBuffer {
    /// Buffer for a `rows` x `cols` grid.
    pub fn new(
        rows: usize,
        cols: usize,
        initial_points: usize,
        max_points: usize,
        downsample_ratio: usize,
    ) -> AppResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(GalileoError::Configuration(
                "Plot grid must have at least one subplot".into(),
            ));
        }
        if downsample_ratio < 2 || max_points < 2 * downsample_ratio {
            return Err(GalileoError::Configuration(format!(
                "Plot buffer ceiling {max_points} is too small for down-sampling ratio {downsample_ratio}"
            )));
        }
        let capacity = initial_points.clamp(2, max_points);
        let cells = rows * cols;
        Ok(Self {
            rows,
            cols,
            series: (0..cells).map(|_| Vec::with_capacity(capacity)).collect(),
            extrema: vec![Extrema::default(); cells],
            capacity,
            max_points,
            downsample_ratio,
        })
    }

    /// Number of points per subplot.
    pub fn len(&self) -> usize {
        self.series.first().map_or(0, Vec::len)
    }

    /// True if nothing has been received yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current reserved length.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grid shape.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// History of subplot `(row, col)`.
    pub fn series(&self, row: usize, col: usize) -> &[[f64; 2]] {
        &self.series[row * self.cols + col]
    }

    /// Extrema of subplot `(row, col)`.
    pub fn extrema(&self, row: usize, col: usize) -> &Extrema {
        &self.extrema[row * self.cols + col]
    }

    /// Appends one point per subplot, growing or down-sampling first if full.
    pub fn push(&mut self, batch: &PointBatch) -> AppResult<()> {
        let shape_ok = batch.points.len() == self.rows
            && batch.points.iter().all(|row| row.len() == self.cols);
        if !shape_ok {
            return Err(GalileoError::PlotProcess(format!(
                "Data frame shape does not match the {}x{} subplot grid",
                self.rows, self.cols
            )));
        }

        let len = self.len();
        if len >= self.max_points {
            self.downsample();
        } else if len >= self.capacity {
            self.grow();
        }

        for (cell, point) in batch.points.iter().flatten().enumerate() {
            let p = [point.x, point.y];
            self.series[cell].push(p);
            self.extrema[cell].include(p);
        }
        Ok(())
    }

    fn grow(&mut self) {
        let new_capacity = (self.capacity * 2).min(self.max_points);
        for series in &mut self.series {
            series.reserve_exact(new_capacity - series.len());
        }
        debug!(from = self.capacity, to = new_capacity, "Extended plot buffer");
        self.capacity = new_capacity;
    }

    /// Keeps every k-th point plus the newest one.
    fn downsample(&mut self) {
        let before = self.len();
        let ratio = self.downsample_ratio;
        for series in &mut self.series {
            *series = downsampled(series, ratio);
        }
        self.recompute_extrema();
        debug!(from = before, to = self.len(), "Plot buffer full, down-sampled");
    }

    /// Truncates every series to its last two points and resets the extrema
    /// from them.
    pub fn clear(&mut self) {
        for series in &mut self.series {
            let keep_from = series.len().saturating_sub(2);
            series.drain(..keep_from);
        }
        self.recompute_extrema();
    }

    fn recompute_extrema(&mut self) {
        for (extrema, series) in self.extrema.iter_mut().zip(&self.series) {
            *extrema = Extrema::of(series);
        }
    }
}

/// Every `ratio`-th point from the first, plus the last if the stride misses it.
pub fn downsampled(points: &[[f64; 2]], ratio: usize) -> Vec<[f64; 2]> {
    let ratio = ratio.max(1);
    let mut kept: Vec<[f64; 2]> = points.iter().step_by(ratio).copied().collect();
    if let Some(&last) = points.last() {
        if (points.len() - 1) % ratio != 0 {
            kept.push(last);
        }
    }
    kept
}
