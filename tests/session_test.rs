//! Whole sessions built from configuration, driven through the prompt.

mod common;

use common::{RecordingLogger, TestExperiment};
use galileo::config::Settings;
use galileo::coordinator::{Coordinator, CoordinatorOptions};
use galileo::run_state::RunState;
use galileo::shell;
use std::time::Duration;
use tempfile::tempdir;

fn session_settings(directory: &std::path::Path, max_ticks: u64) -> Settings {
    Settings::from_toml_str(&format!(
        r#"
        [measurement]
        title = "session test"
        interval = "1ms"
        max_ticks = {max_ticks}

        [storage]
        directory = '{}'
        file_stem = "mi"

        [plot]
        worker = "in_process"
        listen_interval = "2ms"
        refresh_interval = "5ms"
        "#,
        directory.display()
    ))
    .expect("valid settings")
}

#[cfg(feature = "storage_csv")]
#[tokio::test]
async fn test_configured_session_writes_csv_and_notes() {
    let dir = tempdir().unwrap();
    let settings = session_settings(dir.path(), 5);
    let mut coordinator = Coordinator::from_settings(&settings)
        .await
        .expect("session from settings");
    coordinator.start().await.expect("start");

    let mut state = coordinator.subscribe_state();
    state.wait_for(|s| *s == RunState::Stopped).await.unwrap();
    assert!(coordinator.note("cooldown finished").is_applied());
    coordinator.quit().await.expect("quit");

    let mut csv_files = Vec::new();
    let mut notes_files = Vec::new();
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name.ends_with("_mi.notes.txt") {
            notes_files.push(path);
        } else if name.ends_with("_mi.csv") {
            csv_files.push(path);
        }
    }
    assert_eq!(csv_files.len(), 1);
    assert_eq!(notes_files.len(), 1);

    let csv = std::fs::read_to_string(&csv_files[0]).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 6, "header plus five rows:\n{csv}");
    assert_eq!(lines[0], "n,t (s),T (K),H (T),X (V),Y (V)");
    let ticks: Vec<&str> = lines[1..]
        .iter()
        .map(|line| line.split(',').next().unwrap())
        .collect();
    assert_eq!(ticks, vec!["1", "2", "3", "4", "5"]);

    let notes = std::fs::read_to_string(&notes_files[0]).unwrap();
    assert!(notes.starts_with("# session test\n"));
    assert!(notes.contains("## configuration"));
    assert!(notes.contains("max_ticks = 5"));
    assert!(notes.trim_end().ends_with("] cooldown finished"));
}

#[tokio::test]
async fn test_prompt_drives_the_run() {
    let (logger, record) = RecordingLogger::new();
    let mut coordinator = Coordinator::new(
        CoordinatorOptions {
            interval: Duration::from_millis(1),
            ..CoordinatorOptions::default()
        },
        Box::new(TestExperiment::new()),
        Box::new(logger),
    );
    coordinator.start().await.expect("start");

    let input: &[u8] = b"help\npause\n\nlaunch rockets\nnote hi\nresume\nstatus\nplot\ns\nq\n";
    let mut output = Vec::new();
    shell::run(&mut coordinator, input, &mut output)
        .await
        .expect("prompt");
    let output = String::from_utf8(output).unwrap();

    assert!(output.contains("Commands:"));
    assert!(output.contains("Paused."));
    assert!(output.contains("Warning: Unknown command 'launch rockets'"));
    assert!(output.contains("Warning: This run has no notes file"));
    assert!(output.contains("Resumed."));
    assert!(output.contains("state: running"));
    assert!(output.contains("Warning: Plotting is disabled"));
    assert!(output.contains("Stopped."));
    assert!(output.trim_end().ends_with("Bye."));
    assert_eq!(coordinator.run_state(), RunState::Stopped);
    assert!(record.lock().unwrap().finished);
}

#[tokio::test]
async fn test_end_of_input_quits() {
    let (logger, record) = RecordingLogger::new();
    let mut coordinator = Coordinator::new(
        CoordinatorOptions::default(),
        Box::new(TestExperiment::new()),
        Box::new(logger),
    );
    coordinator.start().await.expect("start");
    let mut output = Vec::new();
    shell::run(&mut coordinator, &b""[..], &mut output)
        .await
        .expect("prompt");
    assert_eq!(coordinator.run_state(), RunState::Stopped);
    assert!(record.lock().unwrap().finished);
}
