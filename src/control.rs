//! Live control commands read from stdin while the stream runs.

use crate::segmentation::Accuracy;
use crossbeam_channel::{unbounded, Receiver};
use std::io::BufRead;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    SetAccuracy(Accuracy),
    ToggleMatte,
    Stats,
    Quit,
}

impl ControlCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "fast" | "f" => Some(ControlCommand::SetAccuracy(Accuracy::Fast)),
            "accurate" | "a" => Some(ControlCommand::SetAccuracy(Accuracy::Accurate)),
            "matte" | "m" => Some(ControlCommand::ToggleMatte),
            "stats" | "s" => Some(ControlCommand::Stats),
            "quit" | "q" => Some(ControlCommand::Quit),
            _ => None,
        }
    }
}

/// Read commands from stdin on a background thread
pub fn spawn_stdin_reader() -> Receiver<ControlCommand> {
    let (tx, rx) = unbounded();

    let spawned = thread::Builder::new()
        .name("stdin-control".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match ControlCommand::parse(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => tracing::warn!(
                        "Unknown command {:?} (fast, accurate, matte, stats, quit)",
                        line.trim()
                    ),
                }
            }
        });

    if let Err(err) = spawned {
        tracing::warn!("Live controls unavailable: {}", err);
    }

    rx
}
