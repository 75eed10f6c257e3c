// Engine Errors
// Error taxonomy shared by graph construction, plan building, storage and execution

use crate::graph::GraphError;
use crate::plan::StepOutputHandle;

use std::fmt;
use std::io;
use thiserror::Error;

/// Boxed error returned by user code (compute bodies, expectations, resources)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the engine
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("plan construction error: {0}")]
    PlanConstruction(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    StepExecution(#[from] StepExecutionError),

    #[error("missing intermediate for run '{run_id}': {handle}")]
    MissingIntermediate {
        run_id: String,
        handle: StepOutputHandle,
    },

    #[error("intermediate already written for run '{run_id}': {handle}")]
    DuplicateWrite {
        run_id: String,
        handle: StepOutputHandle,
    },

    #[error(
        "type '{type_name}' wraps '{inner_type}', which requires a storage plugin; \
         composite types over plugin types are not supported"
    )]
    UnsupportedCompositeStorage {
        type_name: String,
        inner_type: String,
    },

    #[error("execution step not found: {0}")]
    StepNotFound(String),

    #[error("resource '{name}' failed to initialize: {message}")]
    ResourceInit { name: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    pub fn plan(message: impl Into<String>) -> Self {
        Self::PlanConstruction(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn codec(message: impl fmt::Display) -> Self {
        Self::Codec(message.to_string())
    }

    /// Build-time errors surface before any step runs
    pub fn is_build_time(&self) -> bool {
        matches!(
            self,
            Self::Graph(_)
                | Self::PlanConstruction(_)
                | Self::UnsupportedCompositeStorage { .. }
                | Self::StepNotFound(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// What went wrong inside a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepErrorKind {
    /// User compute body returned an error
    UserCode,
    /// User compute body panicked
    Panic,
    /// An expectation check reported failure
    ExpectationFailed,
    /// A value did not match its declared type
    TypeCheck,
    /// The step exceeded the configured timeout
    Timeout,
    /// The step broke an engine contract (e.g. emitted an undeclared output)
    InvariantViolation,
    /// Reading an input file or writing a materialization failed
    Io,
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepErrorKind::UserCode => "user code error",
            StepErrorKind::Panic => "panic",
            StepErrorKind::ExpectationFailed => "expectation failed",
            StepErrorKind::TypeCheck => "type check failed",
            StepErrorKind::Timeout => "timed out",
            StepErrorKind::InvariantViolation => "invariant violation",
            StepErrorKind::Io => "io error",
        };
        write!(f, "{}", label)
    }
}

/// Error captured at the step boundary; recorded per step, never fatal to the run
#[derive(Debug, Clone, Error)]
#[error("step '{step_key}' failed ({kind}): {message}")]
pub struct StepExecutionError {
    pub step_key: String,
    pub node_handle: String,
    pub kind: StepErrorKind,
    pub message: String,
    /// Rendering of the original error, including its source chain
    pub cause: Option<String>,
    pub backtrace: Option<String>,
}

impl StepExecutionError {
    pub fn new(
        step_key: impl Into<String>,
        node_handle: impl Into<String>,
        kind: StepErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            step_key: step_key.into(),
            node_handle: node_handle.into(),
            kind,
            message: message.into(),
            cause: None,
            backtrace: None,
        }
    }

    /// Wrap an error returned by user code
    pub fn from_user_error(
        step_key: impl Into<String>,
        node_handle: impl Into<String>,
        err: &(dyn std::error::Error + 'static),
    ) -> Self {
        let mut chain = vec![err.to_string()];
        let mut source = err.source();
        while let Some(inner) = source {
            chain.push(inner.to_string());
            source = inner.source();
        }

        let backtrace = std::backtrace::Backtrace::capture();
        let backtrace = match backtrace.status() {
            std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };

        Self {
            cause: Some(chain.join(": caused by: ")),
            backtrace,
            ..Self::new(step_key, node_handle, StepErrorKind::UserCode, err.to_string())
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = Some(backtrace.into());
        self
    }

    pub fn is_user_code_error(&self) -> bool {
        matches!(self.kind, StepErrorKind::UserCode | StepErrorKind::Panic)
    }
}
