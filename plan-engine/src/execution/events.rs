// Execution Events
// Progress reporting, run events and structured log records

use crate::error::StepExecutionError;
use crate::plan::StepKind;
use crate::types::Value;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Expose a progress receiver as a `Stream`
pub fn progress_stream(rx: ProgressReceiver) -> UnboundedReceiverStream<ExecutionEvent> {
    UnboundedReceiverStream::new(rx)
}

/// Events emitted during a run, in the order they happen
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: String,
        graph_name: String,
        mode: String,
        total_steps: usize,
        tags: BTreeMap<String, String>,
    },

    RunCompleted {
        run_id: String,
        success: bool,
        canceled: bool,
        duration: Duration,
    },

    StepStarted {
        run_id: String,
        step_key: String,
        kind: StepKind,
    },

    /// A step produced one of its outputs
    StepOutput {
        run_id: String,
        step_key: String,
        output_name: String,
        value: Value,
    },

    ExpectationEvaluated {
        run_id: String,
        step_key: String,
        name: String,
        success: bool,
        message: Option<String>,
        metadata: BTreeMap<String, Value>,
    },

    Materialized {
        run_id: String,
        step_key: String,
        path: String,
        description: Option<String>,
    },

    StepSucceeded {
        run_id: String,
        step_key: String,
        duration: Duration,
    },

    StepFailed {
        run_id: String,
        step_key: String,
        error: StepExecutionError,
        duration: Duration,
    },

    StepSkipped {
        run_id: String,
        step_key: String,
        reason: String,
    },

    /// An upstream value was copied from a prior run instead of recomputed
    IntermediateCopied {
        run_id: String,
        prior_run_id: String,
        handle: String,
    },

    Log(LogRecord),
}

impl ExecutionEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepOutput { run_id, .. }
            | Self::ExpectationEvaluated { run_id, .. }
            | Self::Materialized { run_id, .. }
            | Self::StepSucceeded { run_id, .. }
            | Self::StepFailed { run_id, .. }
            | Self::StepSkipped { run_id, .. }
            | Self::IntermediateCopied { run_id, .. } => run_id,
            Self::Log(record) => &record.run_id,
        }
    }

    /// Step the event belongs to, if any
    pub fn step_key(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step_key, .. }
            | Self::StepOutput { step_key, .. }
            | Self::ExpectationEvaluated { step_key, .. }
            | Self::Materialized { step_key, .. }
            | Self::StepSucceeded { step_key, .. }
            | Self::StepFailed { step_key, .. }
            | Self::StepSkipped { step_key, .. } => Some(step_key),
            Self::Log(record) => record.step_key.as_deref(),
            Self::RunStarted { .. }
            | Self::RunCompleted { .. }
            | Self::IntermediateCopied { .. } => None,
        }
    }
}

/// Log level for log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// Structured log record emitted by the engine and by user compute bodies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub run_id: String,
    pub step_key: Option<String>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            run_id: run_id.into(),
            step_key: None,
        }
    }

    pub fn for_step(mut self, step_key: impl Into<String>) -> Self {
        self.step_key = Some(step_key.into());
        self
    }
}

/// Destination for log records
pub trait LogSink: Send + Sync {
    fn log(&self, record: &LogRecord);
}

/// Forwards records to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, record: &LogRecord) {
        let step_key = record.step_key.as_deref().unwrap_or("-");
        match record.level {
            LogLevel::Debug => {
                tracing::debug!(run_id = %record.run_id, step_key, "{}", record.message)
            }
            LogLevel::Info => {
                tracing::info!(run_id = %record.run_id, step_key, "{}", record.message)
            }
            LogLevel::Warning => {
                tracing::warn!(run_id = %record.run_id, step_key, "{}", record.message)
            }
            LogLevel::Error => {
                tracing::error!(run_id = %record.run_id, step_key, "{}", record.message)
            }
        }
    }
}

/// Keeps every record in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl LogSink for MemoryLogSink {
    fn log(&self, record: &LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
