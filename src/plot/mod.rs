//! Live plotting.
//!
//! The coordinator talks to a plot worker through [`PlotLink`]; the worker
//! runs either as a separate `galileo plot-worker` process or as a task in
//! the coordinator's runtime ([`PlotHost`]). Inside the worker,
//! [`PlotState`] owns the point history and [`PlotWindow`] puts it on screen.

mod buffer;
mod headless;
mod host;
mod link;
mod state;
pub mod worker;

#[cfg(feature = "gui")]
pub mod egui_window;

pub use buffer::{downsampled, AxisLimits, Extrema, PlotBuffer};
pub use headless::HeadlessWindow;
pub use host::{JoinOutcome, PlotHost};
pub use link::PlotLink;
pub use state::PlotState;

use crate::error::AppResult;

/// Something that shows a [`PlotState`].
///
/// The worker loop calls `open` when a window is wanted and there is data to
/// draw, `render` on every refresh tick while `is_open`, and `close` on quit.
/// A window the operator closes reports `is_open() == false`.
pub trait PlotWindow: Send {
    /// Opens a window showing `state`.
    fn open(&mut self, state: &PlotState) -> AppResult<()>;

    /// True while a window is visible.
    fn is_open(&self) -> bool;

    /// Redraws from `state`.
    fn render(&mut self, state: &PlotState) -> AppResult<()>;

    /// Closes the window, if open.
    fn close(&mut self);
}

/// Runs the plot worker over stdin/stdout until the coordinator quits.
///
/// With the `gui` feature the calling thread becomes the GUI thread;
/// otherwise plots are tracked headlessly.
pub fn serve_stdio() -> AppResult<()> {
    #[cfg(feature = "gui")]
    {
        egui_window::run_stdio()
    }
    #[cfg(not(feature = "gui"))]
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(worker::run_stdio(HeadlessWindow::new()))
    }
}
