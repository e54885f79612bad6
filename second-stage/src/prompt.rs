//! Operator prompt for paused file moves.

use std::io::BufRead;
use tokio::sync::mpsc;
use update_engine::handoff::OperatorDecision;

/// Read stdin lines on a dedicated thread.
///
/// A plain thread rather than a blocking task, so a pending read never
/// holds up runtime shutdown.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Interpret an operator answer: `r`/`retry` or `a`/`abort`.
pub fn parse_decision(input: &str) -> Option<OperatorDecision> {
    match input.trim().to_ascii_lowercase().as_str() {
        "r" | "retry" => Some(OperatorDecision::Retry),
        "a" | "abort" => Some(OperatorDecision::Abort),
        _ => None,
    }
}

/// Keep asking until a valid answer arrives. End of input means abort.
pub async fn ask(lines: &mut mpsc::UnboundedReceiver<String>) -> OperatorDecision {
    loop {
        println!("Type R to retry or A to abort, then press ENTER.");
        match lines.recv().await {
            Some(line) => {
                if let Some(decision) = parse_decision(&line) {
                    return decision;
                }
            }
            None => return OperatorDecision::Abort,
        }
    }
}
