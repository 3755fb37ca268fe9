//! Interactive operator prompt.

use crate::coordinator::{Coordinator, Outcome};
use crate::error::AppResult;
use crate::run_state::RunState;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

/// Prompt printed before every command.
pub const PROMPT: &str = "?> ";

/// Command reference printed by `help`.
pub const HELP: &str = "\
Commands:
  help, h              show this help
  pause, p             pause acquisition
  resume, r            resume acquisition
  stop, s              stop acquisition (keeps the plot)
  quit, q              stop acquisition, close the plot and exit
  plot, replot         reopen the plot window
  autoscale on, +a     enable plot autoscaling
  autoscale off, -a    disable plot autoscaling
  clear plot, clear    drop plot history except the last two points
  status               show run state and the latest sample
  note <text>          append a timestamped note to the notes file";

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Print the command reference
    Help,
    /// Suspend acquisition
    Pause,
    /// Continue acquisition
    Resume,
    /// Stop acquisition
    Stop,
    /// Stop everything and leave
    Quit,
    /// Reopen the plot window
    Replot,
    /// Toggle plot autoscaling
    Autoscale(bool),
    /// Truncate plot history
    Clear,
    /// Print run status
    Status,
    /// Annotate the run
    Note(String),
}

impl ShellCommand {
    /// Parses one input line. Blank input yields `Ok(None)`; anything
    /// unrecognized is an error message for the operator.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        if word.eq_ignore_ascii_case("note") {
            return Ok(Some(ShellCommand::Note(rest.to_string())));
        }

        let normalized = line
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        let command = match normalized.as_str() {
            "help" | "h" | "?" => ShellCommand::Help,
            "pause" | "p" => ShellCommand::Pause,
            "resume" | "r" => ShellCommand::Resume,
            "stop" | "s" => ShellCommand::Stop,
            "quit" | "q" | "exit" => ShellCommand::Quit,
            "plot" | "replot" => ShellCommand::Replot,
            "autoscale on" | "+a" => ShellCommand::Autoscale(true),
            "autoscale off" | "-a" => ShellCommand::Autoscale(false),
            "clear plot" | "clear" => ShellCommand::Clear,
            "status" => ShellCommand::Status,
            _ => return Err(format!("Unknown command '{line}'. Type 'help' for a list.")),
        };
        Ok(Some(command))
    }
}

/// Runs `command` and returns the text to show the operator.
pub async fn execute(coordinator: &mut Coordinator, command: &ShellCommand) -> String {
    let outcome = match command {
        ShellCommand::Help => return HELP.to_string(),
        ShellCommand::Status => return coordinator.status().await.to_string(),
        ShellCommand::Pause => coordinator.pause(),
        ShellCommand::Resume => coordinator.resume(),
        ShellCommand::Stop => match coordinator.stop().await {
            Ok(outcome) => outcome,
            Err(e) => return format!("Measurement ended with an error: {e}"),
        },
        ShellCommand::Quit => match coordinator.quit().await {
            Ok(outcome) => outcome,
            Err(e) => return format!("Measurement ended with an error: {e}"),
        },
        ShellCommand::Replot => coordinator.replot().await,
        ShellCommand::Autoscale(on) => coordinator.autoscale(*on).await,
        ShellCommand::Clear => coordinator.clear().await,
        ShellCommand::Note(text) => coordinator.note(text),
    };
    match outcome {
        Outcome::Applied => confirmation(command).to_string(),
        Outcome::Warning(message) => format!("Warning: {message}"),
    }
}

fn confirmation(command: &ShellCommand) -> &'static str {
    match command {
        ShellCommand::Pause => "Paused.",
        ShellCommand::Resume => "Resumed.",
        ShellCommand::Stop => "Stopped.",
        ShellCommand::Quit => "Bye.",
        ShellCommand::Replot => "Plot window open.",
        ShellCommand::Autoscale(true) => "Autoscale on.",
        ShellCommand::Autoscale(false) => "Autoscale off.",
        ShellCommand::Clear => "Plot cleared.",
        ShellCommand::Note(_) => "Noted.",
        ShellCommand::Help | ShellCommand::Status => "",
    }
}

async fn say<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> AppResult<()> {
    if !text.is_empty() {
        output.write_all(text.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await?;
    Ok(())
}

/// Reads commands from `input` until `quit` or end of input (which quits).
///
/// When the run ends on its own while the prompt is waiting, a notice is
/// printed once; the prompt stays up so the operator can still quit or
/// replot.
pub async fn run<R, W>(coordinator: &mut Coordinator, input: R, mut output: W) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut state = coordinator.subscribe_state();
    let mut finished_noticed = coordinator.run_state() == RunState::Stopped;

    say(
        &mut output,
        &format!("{} running. Type 'help' for commands.", coordinator.title()),
    )
    .await?;

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = async { state.wait_for(|s| *s == RunState::Stopped).await.map(|_| ()) },
                if !finished_noticed =>
            {
                finished_noticed = true;
                say(&mut output, "\nMeasurement finished. Type 'quit' to exit.").await?;
                continue;
            }
        };

        let Some(line) = line else {
            info!("Input closed, quitting");
            let text = execute(coordinator, &ShellCommand::Quit).await;
            say(&mut output, &text).await?;
            break;
        };

        match ShellCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(command)) => {
                let text = execute(coordinator, &command).await;
                say(&mut output, &text).await?;
                match command {
                    ShellCommand::Quit => break,
                    ShellCommand::Stop => finished_noticed = true,
                    _ => {}
                }
            }
            Err(message) => {
                warn!("{message}");
                say(&mut output, &format!("Warning: {message}")).await?;
            }
        }
    }
    Ok(())
}
