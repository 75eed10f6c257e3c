// Output formatting helpers for CLI commands

use plan_engine::{StepKind, StepState};

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

/// One plan row: position, kind and step key
pub fn plan_row(position: usize, kind: StepKind, key: &str) {
    println!("  {:>3}  {:<22} {}", position + 1, kind.to_string(), key);
}

/// Indented detail under a step (inputs, outputs, values)
pub fn step_detail(line: &str) {
    println!("        | {}", line);
}

/// Print step error output (indented, red)
pub fn step_error(line: &str) {
    eprintln!("\x1b[31m        | {}\x1b[0m", line);
}

/// Colored label for a terminal step state
pub fn state_label(state: StepState) -> String {
    match state {
        StepState::Success => "\x1b[32mOK\x1b[0m".to_string(),
        StepState::Failure => "\x1b[31mFAIL\x1b[0m".to_string(),
        StepState::Skipped => "\x1b[33mSKIP\x1b[0m".to_string(),
        StepState::Pending | StepState::Running => format!("{:?}", state),
    }
}
