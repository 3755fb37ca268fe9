//! Worker-side plot state, independent of any window toolkit.

use super::buffer::{AxisLimits, PlotBuffer};
use crate::error::AppResult;
use crate::protocol::{Control, PlotCommand, PlotSetup};
use tracing::{debug, warn};

/// Buffers, axis limits and flags driven by [`PlotCommand`]s.
#[derive(Debug, Clone)]
pub struct PlotState {
    setup: PlotSetup,
    buffer: PlotBuffer,
    limits: Vec<AxisLimits>,
    autoscale: bool,
    dirty: bool,
    replot_requested: bool,
    acquisition_stopped: bool,
    quit: bool,
}

impl PlotState {
    /// Empty state for `setup`. A window is requested as soon as there is
    /// enough data to draw.
    pub fn new(setup: PlotSetup) -> AppResult<Self> {
        let buffer = PlotBuffer::new(
            setup.rows(),
            setup.cols(),
            setup.initial_points,
            setup.max_points,
            setup.downsample_ratio,
        )?;
        let limits = vec![AxisLimits::default(); setup.rows() * setup.cols()];
        Ok(Self {
            setup,
            buffer,
            limits,
            autoscale: true,
            dirty: false,
            replot_requested: true,
            acquisition_stopped: false,
            quit: false,
        })
    }

    /// Applies one command. Returns the acknowledgement to send, if any.
    pub fn dispatch(&mut self, command: PlotCommand) -> AppResult<Option<Control>> {
        match command {
            PlotCommand::Hello(_) => {
                warn!("Ignoring repeated setup frame");
                Ok(None)
            }
            PlotCommand::Data(batch) => {
                self.buffer.push(&batch)?;
                self.dirty = true;
                Ok(None)
            }
            PlotCommand::AutoscaleOn => {
                self.autoscale = true;
                self.rescale_all();
                Ok(Some(Control::AutoscaleOn))
            }
            PlotCommand::AutoscaleOff => {
                self.autoscale = false;
                Ok(Some(Control::AutoscaleOff))
            }
            PlotCommand::Clear => {
                self.buffer.clear();
                self.dirty = true;
                if self.autoscale {
                    self.rescale_all();
                }
                Ok(Some(Control::Clear))
            }
            PlotCommand::Replot => {
                self.replot_requested = true;
                Ok(None)
            }
            PlotCommand::Stop => {
                debug!(points = self.buffer.len(), "Acquisition stopped, keeping plot");
                self.acquisition_stopped = true;
                Ok(None)
            }
            PlotCommand::Quit => {
                self.quit = true;
                Ok(Some(Control::Quit))
            }
        }
    }

    /// Prepares a redraw. With autoscale on, all subplots are rescaled when
    /// any of them has data outside its current limits. Returns true if
    /// anything changed since the last call.
    pub fn redraw(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;
        if self.autoscale && self.any_out_of_range() {
            self.rescale_all();
        }
        true
    }

    fn any_out_of_range(&self) -> bool {
        let (rows, cols) = self.buffer.shape();
        (0..rows).any(|r| {
            (0..cols).any(|c| !self.limits[r * cols + c].contains(self.buffer.extrema(r, c)))
        })
    }

    /// Fits every subplot's limits to its data plus the overrange margin.
    pub fn rescale_all(&mut self) {
        let (rows, cols) = self.buffer.shape();
        for r in 0..rows {
            for c in 0..cols {
                let extrema = self.buffer.extrema(r, c);
                if !extrema.is_empty() {
                    self.limits[r * cols + c] = AxisLimits::around(extrema, self.setup.overrange);
                }
            }
        }
    }

    /// A window should be opened now: one was requested and there are at
    /// least two points to draw.
    pub fn should_open_window(&self) -> bool {
        self.replot_requested && self.buffer.len() >= 2
    }

    /// Marks the pending window request as served.
    pub fn window_opened(&mut self) {
        self.replot_requested = false;
        self.dirty = true;
    }

    /// Forgets a pending window request.
    pub fn cancel_replot(&mut self) {
        self.replot_requested = false;
    }

    /// True once `Quit` arrived.
    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// True once `Stop` arrived.
    pub fn acquisition_stopped(&self) -> bool {
        self.acquisition_stopped
    }

    /// Autoscale flag.
    pub fn autoscale(&self) -> bool {
        self.autoscale
    }

    /// Setup received from the coordinator.
    pub fn setup(&self) -> &PlotSetup {
        &self.setup
    }

    /// Point history.
    pub fn buffer(&self) -> &PlotBuffer {
        &self.buffer
    }

    /// Limits of subplot `(row, col)`.
    pub fn limits(&self, row: usize, col: usize) -> AxisLimits {
        self.limits[row * self.setup.cols() + col]
    }
}
