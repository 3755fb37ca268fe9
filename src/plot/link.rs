//! Coordinator-side end of the plot channel.
//!
//! Two background tasks own the pipe halves. The writer drains a bounded
//! command queue; the reader turns worker events into shared state:
//!
//! - `Ready` sets a readiness flag the measurement loop consumes at most
//!   once per tick,
//! - `Done` acknowledgements are broadcast to whoever is waiting for them,
//! - window open/close is published on a watch channel.

use crate::error::{AppResult, GalileoError};
use crate::protocol::{write_frame, Control, FrameReader, PlotCommand, PlotEvent, PointBatch};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, warn};

const COMMAND_QUEUE: usize = 64;
const ACK_QUEUE: usize = 16;

/// Handle to a running plot worker's pipe.
#[derive(Debug)]
pub struct PlotLink {
    commands: mpsc::Sender<PlotCommand>,
    ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    done: broadcast::Sender<Control>,
    window: watch::Receiver<bool>,
    dropped: AtomicU64,
}

impl PlotLink {
    /// Starts the reader and writer tasks over the worker's output and input.
    pub fn spawn<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (commands, mut queue) = mpsc::channel::<PlotCommand>(COMMAND_QUEUE);
        let ready = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let (done, _) = broadcast::channel(ACK_QUEUE);
        let (window_tx, window) = watch::channel(false);

        let writer_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(command) = queue.recv().await {
                if let Err(e) = write_frame(&mut writer, &command).await {
                    warn!("Plot worker stopped accepting commands: {e}");
                    writer_closed.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        let reader_ready = Arc::clone(&ready);
        let reader_closed = Arc::clone(&closed);
        let reader_done = done.clone();
        tokio::spawn(async move {
            let mut frames = FrameReader::new(reader);
            loop {
                match frames.next::<PlotEvent>().await {
                    Ok(Some(PlotEvent::Ready)) => reader_ready.store(true, Ordering::SeqCst),
                    Ok(Some(PlotEvent::Done(control))) => {
                        debug!(?control, "Plot command acknowledged");
                        let _ = reader_done.send(control);
                    }
                    Ok(Some(PlotEvent::WindowShown)) => {
                        window_tx.send_replace(true);
                    }
                    Ok(Some(PlotEvent::WindowClosed)) => {
                        window_tx.send_replace(false);
                    }
                    Ok(None) => break,
                    Err(GalileoError::Protocol(e)) => {
                        warn!("Ignoring malformed frame from plot worker: {e}");
                    }
                    Err(e) => {
                        warn!("Plot worker pipe failed: {e}");
                        break;
                    }
                }
            }
            debug!("Plot worker output closed");
            reader_closed.store(true, Ordering::SeqCst);
            window_tx.send_replace(false);
        });

        Self {
            commands,
            ready,
            closed,
            done,
            window,
            dropped: AtomicU64::new(0),
        }
    }

    /// Consumes the readiness flag. True at most once per `Ready` received.
    ///
    /// The flag is spent even if the following [`send_data`](Self::send_data)
    /// finds the queue full and drops the frame.
    pub fn take_ready(&self) -> bool {
        self.ready.swap(false, Ordering::SeqCst)
    }

    /// Sets the readiness flag as if the worker had asked for data.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// True once either pipe half has failed or reached end of stream.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Last reported window status.
    pub fn window_open(&self) -> bool {
        *self.window.borrow()
    }

    /// Data frames dropped because the command queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queues `command`, waiting for queue space.
    pub async fn send(&self, command: PlotCommand) -> AppResult<()> {
        if self.is_closed() {
            return Err(GalileoError::PlotChannelClosed);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| GalileoError::PlotChannelClosed)
    }

    /// Queues `command` only if there is room right now. Returns whether it
    /// was queued.
    pub fn try_send(&self, command: PlotCommand) -> bool {
        !self.is_closed() && self.commands.try_send(command).is_ok()
    }

    /// Queues a data frame without waiting. Plotting is lossy: a full queue
    /// drops the frame. Returns whether it was queued.
    pub fn send_data(&self, batch: PointBatch) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.commands.try_send(PlotCommand::Data(batch)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Plot queue full, dropping data frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Sends `command` and waits up to `wait` for its acknowledgement.
    ///
    /// The wait covers queueing too, so a worker that stops reading cannot
    /// hold the caller. Returns `Ok(false)` on timeout. Commands without an
    /// acknowledgement return `Ok(true)` once queued.
    pub async fn request(&self, command: PlotCommand, wait: Duration) -> AppResult<bool> {
        let Some(expected) = command.expected_ack() else {
            return match timeout(wait, self.send(command)).await {
                Ok(sent) => sent.map(|_| true),
                Err(_) => Ok(false),
            };
        };
        // Subscribe first so a fast acknowledgement is not missed.
        let mut acks = self.done.subscribe();
        let acknowledged = async {
            self.send(command).await?;
            loop {
                match acks.recv().await {
                    Ok(control) if control == expected => return AppResult::Ok(()),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(GalileoError::PlotChannelClosed)
                    }
                }
            }
        };
        match timeout(wait, acknowledged).await {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    /// Asks for a window and waits up to `wait`, queueing included, until
    /// one is reported open.
    pub async fn replot(&self, wait: Duration) -> AppResult<bool> {
        let mut window = self.window.clone();
        let opened = async {
            self.send(PlotCommand::Replot).await?;
            window
                .wait_for(|open| *open)
                .await
                .map(|_| ())
                .map_err(|_| GalileoError::PlotChannelClosed)?;
            AppResult::Ok(())
        };
        let outcome = match timeout(wait, opened).await {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        };
        outcome
    }
}
