//! egui window for the plot worker.
//!
//! eframe must own the main thread, so the worker loop runs on a background
//! runtime and talks to the GUI through a shared snapshot plus a small
//! request channel. Each `open` runs one native window until the operator
//! closes it or the worker asks it to close.

use super::state::PlotState;
use super::{worker, PlotWindow};
use crate::error::{AppResult, GalileoError};
use crate::protocol::AxisPair;
use egui_plot::{Line, Plot, PlotBounds, PlotPoints};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// What the GUI thread draws.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    subplots: Vec<Vec<AxisPair>>,
    series: Vec<Vec<Vec<[f64; 2]>>>,
    limits: Vec<Vec<([f64; 2], [f64; 2])>>,
    refresh: Duration,
}

impl Snapshot {
    fn of(state: &PlotState) -> Self {
        let setup = state.setup();
        let buffer = state.buffer();
        let mut series = Vec::with_capacity(setup.rows());
        let mut limits = Vec::with_capacity(setup.rows());
        for r in 0..setup.rows() {
            let mut row_series = Vec::with_capacity(setup.cols());
            let mut row_limits = Vec::with_capacity(setup.cols());
            for c in 0..setup.cols() {
                row_series.push(
                    buffer
                        .series(r, c)
                        .iter()
                        .copied()
                        .filter(|p| p[0].is_finite() && p[1].is_finite())
                        .collect(),
                );
                let l = state.limits(r, c);
                row_limits.push(([l.x.0, l.y.0], [l.x.1, l.y.1]));
            }
            series.push(row_series);
            limits.push(row_limits);
        }
        Self {
            subplots: setup.subplots.clone(),
            series,
            limits,
            refresh: setup.refresh_interval,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    snapshot: Mutex<Snapshot>,
    open: AtomicBool,
    close_requested: AtomicBool,
}

enum GuiRequest {
    Open,
}

/// Worker-side handle to the native window.
pub struct EguiWindow {
    shared: Arc<Shared>,
    requests: mpsc::Sender<GuiRequest>,
}

/// Main-thread side; runs windows on request.
pub struct EguiHost {
    shared: Arc<Shared>,
    requests: mpsc::Receiver<GuiRequest>,
}

/// Creates a connected window handle and host.
pub fn channel() -> (EguiWindow, EguiHost) {
    let shared = Arc::new(Shared::default());
    let (tx, rx) = mpsc::channel();
    (
        EguiWindow {
            shared: Arc::clone(&shared),
            requests: tx,
        },
        EguiHost {
            shared,
            requests: rx,
        },
    )
}

impl EguiWindow {
    fn publish(&self, state: &PlotState) {
        if let Ok(mut snapshot) = self.shared.snapshot.lock() {
            *snapshot = Snapshot::of(state);
        }
    }
}

impl PlotWindow for EguiWindow {
    fn open(&mut self, state: &PlotState) -> AppResult<()> {
        self.publish(state);
        self.shared.close_requested.store(false, Ordering::SeqCst);
        self.shared.open.store(true, Ordering::SeqCst);
        self.requests
            .send(GuiRequest::Open)
            .map_err(|_| GalileoError::PlotProcess("GUI thread has exited".into()))
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn render(&mut self, state: &PlotState) -> AppResult<()> {
        self.publish(state);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.close_requested.store(true, Ordering::SeqCst);
    }
}

impl EguiHost {
    /// Serves window requests until the worker side is dropped.
    pub fn run(self) {
        while let Ok(GuiRequest::Open) = self.requests.recv() {
            if self.shared.close_requested.load(Ordering::SeqCst) {
                self.shared.open.store(false, Ordering::SeqCst);
                continue;
            }
            let app = PlotApp {
                shared: Arc::clone(&self.shared),
            };
            let options = eframe::NativeOptions {
                viewport: egui::ViewportBuilder::default().with_inner_size([900.0, 600.0]),
                ..Default::default()
            };
            if let Err(e) = eframe::run_native(
                "Galileo plot",
                options,
                Box::new(|_cc| Ok(Box::new(app))),
            ) {
                error!("Plot window failed: {e}");
            }
            self.shared.open.store(false, Ordering::SeqCst);
            info!("Plot window closed");
        }
    }
}

struct PlotApp {
    shared: Arc<Shared>,
}

impl eframe::App for PlotApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.shared.close_requested.load(Ordering::SeqCst) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }
        let snapshot = match self.shared.snapshot.lock() {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => return,
        };

        egui::CentralPanel::default().show(ctx, |ui| {
            let rows = snapshot.subplots.len().max(1);
            let cols = snapshot.subplots.first().map_or(1, Vec::len).max(1);
            let spacing = ui.spacing().item_spacing;
            let width = (ui.available_width() - spacing.x * (cols - 1) as f32) / cols as f32;
            let height = (ui.available_height() - spacing.y * (rows - 1) as f32) / rows as f32;

            for (r, row) in snapshot.subplots.iter().enumerate() {
                ui.horizontal(|ui| {
                    for (c, pair) in row.iter().enumerate() {
                        let points = snapshot.series[r][c].clone();
                        let (min, max) = snapshot.limits[r][c];
                        Plot::new(format!("subplot_{r}_{c}"))
                            .width(width)
                            .height(height)
                            .x_axis_label(pair.x_title.clone())
                            .y_axis_label(pair.y_title.clone())
                            .show(ui, |plot_ui| {
                                if min[0] < max[0] && min[1] < max[1] {
                                    plot_ui.set_plot_bounds(PlotBounds::from_min_max(min, max));
                                }
                                plot_ui.line(Line::new(PlotPoints::from(points)));
                            });
                    }
                });
            }
        });

        ctx.request_repaint_after(snapshot.refresh);
    }
}

/// Runs the worker on a background runtime over stdin/stdout and the GUI on
/// the calling thread. Returns when the worker exits.
pub fn run_stdio() -> AppResult<()> {
    let (window, host) = channel();
    let worker = std::thread::Builder::new()
        .name("plot-worker".into())
        .spawn(move || -> AppResult<()> {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(worker::run_stdio(window))
        })?;
    host.run();
    worker
        .join()
        .map_err(|_| GalileoError::PlotProcess("Plot worker thread panicked".into()))?
}
