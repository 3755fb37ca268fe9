//! Window stand-in for builds without a GUI and for tests.

use super::state::PlotState;
use super::PlotWindow;
use crate::error::AppResult;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Shared {
    open: AtomicBool,
    opened: AtomicU64,
    renders: AtomicU64,
    points: AtomicUsize,
}

/// Tracks what a window would show without drawing anything.
///
/// Clones share state, so a test can keep a handle while the worker owns
/// the window.
#[derive(Debug, Clone, Default)]
pub struct HeadlessWindow {
    shared: Arc<Shared>,
}

impl HeadlessWindow {
    /// Closed window.
    pub fn new() -> Self {
        Self::default()
    }

    /// True while "open".
    pub fn is_showing(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Simulates the operator closing the window.
    pub fn dismiss(&self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }

    /// How many times a window was opened.
    pub fn times_opened(&self) -> u64 {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// How many redraws happened.
    pub fn renders(&self) -> u64 {
        self.shared.renders.load(Ordering::SeqCst)
    }

    /// Points per subplot at the last redraw.
    pub fn points(&self) -> usize {
        self.shared.points.load(Ordering::SeqCst)
    }
}

impl PlotWindow for HeadlessWindow {
    fn open(&mut self, state: &PlotState) -> AppResult<()> {
        self.shared.open.store(true, Ordering::SeqCst);
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        debug!(points = state.buffer().len(), "Headless plot window opened");
        self.render(state)
    }

    fn is_open(&self) -> bool {
        self.is_showing()
    }

    fn render(&mut self, state: &PlotState) -> AppResult<()> {
        let points = state.buffer().len();
        self.shared.points.store(points, Ordering::SeqCst);
        self.shared.renders.fetch_add(1, Ordering::SeqCst);
        trace!(points, autoscale = state.autoscale(), "Redraw");
        Ok(())
    }

    fn close(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }
}
