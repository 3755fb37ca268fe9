//! The plot worker's event loop.
//!
//! One loop multiplexes three sources: command frames from the coordinator,
//! the listen tick (announces readiness for the next data frame) and the
//! refresh tick (redraws an open window). Window open/close transitions are
//! reported back after every event.

use super::state::PlotState;
use super::PlotWindow;
use crate::error::{AppResult, GalileoError};
use crate::protocol::{write_frame, Control, FrameReader, PlotCommand, PlotEvent};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Serves one coordinator until `Quit` or end of stream.
///
/// The first frame must be [`PlotCommand::Hello`]; a stream that closes
/// before it is a clean exit.
pub async fn run<R, W, P>(reader: R, mut writer: W, mut window: P) -> AppResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    P: PlotWindow,
{
    let mut frames = FrameReader::new(reader);
    let setup = match frames.next::<PlotCommand>().await? {
        Some(PlotCommand::Hello(setup)) => setup,
        Some(other) => {
            return Err(GalileoError::PlotProcess(format!(
                "Expected setup frame, got {other:?}"
            )));
        }
        None => return Ok(()),
    };
    info!(
        rows = setup.rows(),
        cols = setup.cols(),
        "Plot worker started"
    );

    let mut listen = interval(setup.listen_interval);
    listen.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut refresh = interval(setup.refresh_interval);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut state = PlotState::new(setup)?;
    let mut was_open = false;

    loop {
        tokio::select! {
            frame = frames.next::<PlotCommand>() => {
                let Some(command) = frame? else {
                    info!("Coordinator closed the command stream");
                    break;
                };
                let replot = matches!(command, PlotCommand::Replot);
                if let Some(ack) = state.dispatch(command)? {
                    if ack == Control::Quit {
                        window.close();
                        write_frame(&mut writer, &PlotEvent::Done(Control::Quit)).await?;
                        break;
                    }
                    write_frame(&mut writer, &PlotEvent::Done(ack)).await?;
                }
                if replot && window.is_open() {
                    // Already showing; confirm so the caller stops waiting.
                    state.cancel_replot();
                    write_frame(&mut writer, &PlotEvent::WindowShown).await?;
                }
            }
            _ = listen.tick() => {
                write_frame(&mut writer, &PlotEvent::Ready).await?;
            }
            _ = refresh.tick() => {
                if window.is_open() && state.redraw() {
                    window.render(&state)?;
                }
            }
        }

        if !window.is_open() && state.should_open_window() {
            state.redraw();
            state.rescale_all();
            window.open(&state)?;
            state.window_opened();
        }

        let open = window.is_open();
        if open != was_open {
            let event = if open {
                PlotEvent::WindowShown
            } else {
                PlotEvent::WindowClosed
            };
            debug!(?event, "Plot window changed");
            write_frame(&mut writer, &event).await?;
            was_open = open;
        }
    }

    window.close();
    info!(points = state.buffer().len(), "Plot worker exiting");
    Ok(())
}

/// Serves the coordinator over this process's stdin and stdout.
pub async fn run_stdio<P: PlotWindow>(window: P) -> AppResult<()> {
    run(tokio::io::stdin(), tokio::io::stdout(), window).await
}
