//! Round trip against a real `galileo plot-worker` child process.

mod common;

use common::{eventually, setup};
use galileo::plot::{JoinOutcome, PlotHost};
use galileo::protocol::{PlotCommand, Point, PointBatch};
use std::path::Path;
use std::time::Duration;

fn batch(n: f64) -> PointBatch {
    PointBatch {
        points: vec![vec![Point::new(n, n * n)]],
    }
}

// A real window may fail to open on a display-less machine.
#[cfg(not(feature = "gui"))]
#[tokio::test]
async fn test_child_worker_round_trip() {
    let exe = Path::new(env!("CARGO_BIN_EXE_galileo"));
    let (host, link) = PlotHost::spawn_process(exe, &setup(), "warn")
        .await
        .expect("launch plot worker");

    // The worker asks for data on its listen cadence.
    eventually(|| link.take_ready()).await;

    assert!(link.send_data(batch(1.0)));
    assert!(link.send_data(batch(2.0)));
    // Two points open the initially requested window.
    assert!(link
        .replot(Duration::from_secs(5))
        .await
        .expect("worker alive"));
    assert!(link.window_open());

    assert!(link
        .request(PlotCommand::AutoscaleOff, Duration::from_secs(5))
        .await
        .expect("worker alive"));
    assert!(link
        .request(PlotCommand::Clear, Duration::from_secs(5))
        .await
        .expect("worker alive"));
    link.send(PlotCommand::Stop).await.expect("worker alive");
    assert!(link
        .request(PlotCommand::Quit, Duration::from_secs(5))
        .await
        .expect("worker alive"));

    assert_eq!(
        host.join(Duration::from_secs(5)).await.expect("join"),
        JoinOutcome::Exited
    );
}

#[tokio::test]
async fn test_child_worker_exits_when_pipe_closes() {
    let exe = Path::new(env!("CARGO_BIN_EXE_galileo"));
    let (host, link) = PlotHost::spawn_process(exe, &setup(), "warn")
        .await
        .expect("launch plot worker");
    eventually(|| link.take_ready()).await;
    drop(link);
    assert_eq!(
        host.join(Duration::from_secs(5)).await.expect("join"),
        JoinOutcome::Exited
    );
}
