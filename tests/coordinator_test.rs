//! Run-control behaviour of the coordinator against in-memory fakes.

mod common;

use common::{eventually, setup, FakeWorker, RecordingLogger, TestExperiment};
use galileo::coordinator::{Coordinator, CoordinatorOptions, Outcome};
use galileo::error::GalileoError;
use galileo::plot::{PlotHost, PlotLink};
use galileo::run_state::RunState;
use std::time::{Duration, Instant};

fn options(interval: Duration) -> CoordinatorOptions {
    CoordinatorOptions {
        interval,
        ack_timeout: Duration::from_secs(2),
        quit_timeout: Duration::from_secs(2),
        startup_timeout: Duration::from_secs(2),
    }
}

/// Coordinator with a fake plot worker attached.
fn with_fake_plot(
    experiment: TestExperiment,
    logger: RecordingLogger,
    interval: Duration,
) -> (Coordinator, FakeWorker) {
    let (worker, read, write, handle) = FakeWorker::spawn();
    let link = PlotLink::spawn(read, write);
    let coordinator = Coordinator::new(options(interval), Box::new(experiment), Box::new(logger))
        .with_plot(PlotHost::Task(handle), link, &setup())
        .expect("layout matches schema");
    (coordinator, worker)
}

#[tokio::test]
async fn test_every_tick_is_logged_in_order() {
    let (logger, record) = RecordingLogger::new();
    let experiment = TestExperiment::new();
    let finished = experiment.finished_flag();
    let mut coordinator = Coordinator::new(
        options(Duration::from_millis(1)),
        Box::new(experiment),
        Box::new(logger),
    );

    coordinator.start().await.expect("start");
    eventually(|| coordinator.ticks() >= 20).await;
    assert_eq!(coordinator.stop().await.expect("stop"), Outcome::Applied);

    let summary = coordinator.summary().expect("summary after stop");
    let record = record.lock().unwrap();
    assert!(record.started && record.finished);
    assert_eq!(record.rows.len() as u64, summary.ticks);
    assert_eq!(summary.rows, summary.ticks);
    let expected: Vec<f64> = (1..=summary.ticks).map(|n| n as f64).collect();
    assert_eq!(record.rows, expected);
    assert!(*finished.lock().unwrap());
    assert_eq!(coordinator.run_state(), RunState::Stopped);
}

#[tokio::test]
async fn test_pause_suspends_logging_and_plotting() {
    let (logger, record) = RecordingLogger::new();
    let (mut coordinator, worker) =
        with_fake_plot(TestExperiment::new(), logger, Duration::from_millis(2));
    let link = coordinator.plot_link().expect("plot attached").clone();

    coordinator.start().await.expect("start");
    eventually(|| coordinator.ticks() >= 3).await;
    assert_eq!(coordinator.pause(), Outcome::Applied);
    assert_eq!(coordinator.run_state(), RunState::Paused);

    // A tick already in flight may still land.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let ticks = coordinator.ticks();
    let rows = record.lock().unwrap().rows.len();
    let frames = worker.data_frames();

    link.mark_ready();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.ticks(), ticks);
    assert_eq!(record.lock().unwrap().rows.len(), rows);
    assert_eq!(worker.data_frames(), frames);

    assert_eq!(coordinator.resume(), Outcome::Applied);
    eventually(|| coordinator.ticks() >= ticks + 3).await;
    coordinator.stop().await.expect("stop");

    let record = record.lock().unwrap();
    let expected: Vec<f64> = (1..=record.rows.len()).map(|n| n as f64).collect();
    assert_eq!(record.rows, expected, "tick counter continues after resume");
    drop(record);
    // The readiness raised while paused is served by the first tick after.
    eventually(|| worker.saw_stop()).await;
    assert_eq!(worker.data_frames(), frames + 1);
}

#[tokio::test]
async fn test_data_sent_only_when_ready_at_tick_start() {
    let (logger, record) = RecordingLogger::new();
    let (experiment, mut entered, gate) = TestExperiment::new().with_max_ticks(3).gated();
    let (mut coordinator, worker) = with_fake_plot(experiment, logger, Duration::from_millis(1));
    let link = coordinator.plot_link().expect("plot attached").clone();

    // Ready before tick 1.
    link.mark_ready();
    coordinator.start().await.expect("start");

    assert_eq!(entered.recv().await, Some(1));
    gate.send(()).unwrap();

    // Ready raised while tick 2 is measuring: too late for tick 2, pending
    // for tick 3.
    assert_eq!(entered.recv().await, Some(2));
    link.mark_ready();
    gate.send(()).unwrap();

    assert_eq!(entered.recv().await, Some(3));
    gate.send(()).unwrap();

    let mut state = coordinator.subscribe_state();
    state
        .wait_for(|s| *s == RunState::Stopped)
        .await
        .expect("state channel open");
    coordinator.stop().await.expect("stop joins the finished task");

    let summary = coordinator.summary().expect("summary");
    assert_eq!(summary.ticks, 3);
    assert_eq!(summary.batches, 2);
    assert_eq!(record.lock().unwrap().rows, vec![1.0, 2.0, 3.0]);

    eventually(|| worker.saw_stop()).await;
    assert_eq!(worker.data_ticks(), vec![1.0, 3.0]);
}

#[tokio::test]
async fn test_failed_tick_still_finishes_and_surfaces_on_stop() {
    let (logger, record) = RecordingLogger::new();
    let experiment = TestExperiment::new().failing_at(4);
    let finished = experiment.finished_flag();
    let (mut coordinator, worker) = with_fake_plot(experiment, logger, Duration::from_millis(1));

    coordinator.start().await.expect("start");
    let mut state = coordinator.subscribe_state();
    state
        .wait_for(|s| *s == RunState::Stopped)
        .await
        .expect("state channel open");

    {
        let record = record.lock().unwrap();
        assert_eq!(record.rows, vec![1.0, 2.0, 3.0]);
        assert!(record.finished, "logger closed after the failure");
    }
    assert!(*finished.lock().unwrap());
    eventually(|| worker.saw_stop()).await;

    let err = coordinator.stop().await.unwrap_err();
    assert!(matches!(err, GalileoError::Instrument(_)));
    assert!(matches!(
        coordinator.stop().await.unwrap(),
        Outcome::Warning(_)
    ));
}

#[tokio::test]
async fn test_commands_after_stop_are_warnings() {
    let (logger, _record) = RecordingLogger::new();
    let (mut coordinator, _worker) =
        with_fake_plot(TestExperiment::new(), logger, Duration::from_millis(1));
    coordinator.start().await.expect("start");
    coordinator.stop().await.expect("stop");

    assert!(matches!(coordinator.pause(), Outcome::Warning(_)));
    assert!(matches!(coordinator.resume(), Outcome::Warning(_)));
    assert!(matches!(
        coordinator.stop().await.unwrap(),
        Outcome::Warning(_)
    ));
    assert!(matches!(coordinator.note("hello"), Outcome::Warning(_)));

    // Plot controls still work after acquisition ends.
    assert_eq!(coordinator.autoscale(false).await, Outcome::Applied);
    assert_eq!(coordinator.clear().await, Outcome::Applied);
    assert_eq!(coordinator.quit().await.expect("quit"), Outcome::Applied);
}

#[tokio::test]
async fn test_status_reports_latest_sample() {
    let (logger, _record) = RecordingLogger::new();
    let mut coordinator = Coordinator::new(
        options(Duration::from_millis(1)),
        Box::new(TestExperiment::new().with_max_ticks(5)),
        Box::new(logger),
    );
    coordinator.start().await.expect("start");
    let mut state = coordinator.subscribe_state();
    state.wait_for(|s| *s == RunState::Stopped).await.unwrap();

    let status = coordinator.status().await;
    assert_eq!(status.state, RunState::Stopped);
    assert_eq!(status.ticks, 5);
    assert_eq!(status.sample.get("n"), Some(5.0));
    assert_eq!(status.window_open, None);
    let text = status.to_string();
    assert!(text.starts_with("state: stopped, ticks: 5, plotting disabled\n"));
    assert!(text.contains("n = 5"));

    assert!(matches!(coordinator.replot().await, Outcome::Warning(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_quit_kills_unresponsive_plot_process() {
    let (logger, _record) = RecordingLogger::new();
    let mut command = tokio::process::Command::new("sh");
    command.arg("-c").arg("sleep 60");
    let (host, link) = PlotHost::spawn_command(command, &setup())
        .await
        .expect("spawn stuck worker");
    let mut coordinator = Coordinator::new(
        CoordinatorOptions {
            interval: Duration::from_millis(1),
            // Quit is bounded by the quit timeout alone.
            ack_timeout: Duration::from_secs(30),
            quit_timeout: Duration::from_millis(200),
            startup_timeout: Duration::from_millis(100),
        },
        Box::new(TestExperiment::new()),
        Box::new(logger),
    )
    .with_plot(host, link, &setup())
    .expect("layout");

    coordinator.start().await.expect("start");
    let began = Instant::now();
    let outcome = coordinator.quit().await.expect("quit");
    assert!(matches!(outcome, Outcome::Warning(ref m) if m.contains("killed")));
    assert!(began.elapsed() < Duration::from_secs(2));
    assert_eq!(coordinator.run_state(), RunState::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_quit_returns_when_plot_process_stops_reading() {
    let (logger, _record) = RecordingLogger::new();
    // Asks for data every millisecond and never reads its input.
    let mut command = tokio::process::Command::new("sh");
    command
        .arg("-c")
        .arg("while true; do echo '\"Ready\"'; sleep 0.001; done");
    let (host, link) = PlotHost::spawn_command(command, &setup())
        .await
        .expect("spawn deaf worker");
    let mut coordinator = Coordinator::new(
        CoordinatorOptions {
            interval: Duration::from_micros(200),
            ack_timeout: Duration::from_millis(100),
            quit_timeout: Duration::from_millis(200),
            startup_timeout: Duration::from_millis(100),
        },
        Box::new(TestExperiment::new()),
        Box::new(logger),
    )
    .with_plot(host, link, &setup())
    .expect("layout");
    let link = coordinator.plot_link().expect("plot attached").clone();

    coordinator.start().await.expect("start");
    // Once frames are dropped the pipe and the command queue are both full.
    tokio::time::timeout(Duration::from_secs(30), async {
        while link.dropped() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("command queue never filled");

    let began = Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(5), coordinator.quit())
        .await
        .expect("quit hung")
        .expect("quit");
    assert!(matches!(outcome, Outcome::Warning(ref m) if m.contains("killed")));
    assert!(began.elapsed() < Duration::from_secs(2));
    assert_eq!(coordinator.run_state(), RunState::Stopped);
}
