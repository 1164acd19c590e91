use thiserror::Error;

/// Reason an execution context refuses further work.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    #[error("execution cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Errors seen by node code while reading or writing its ports.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("Port '{0}' not found")]
    NotFound(String),

    #[error("Port '{0}' holds no value for the current cycle")]
    Empty(String),

    #[error("Port '{port}' holds a value of a different type, expected {expected}")]
    TypeMismatch {
        port: String,
        expected: &'static str,
    },
}

/// Errors raised while constructing runners, connectors or whole graphs.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Node info is incomplete: name and version must not be empty (got '{name}' '{version}')")]
    InvalidInfo { name: String, version: String },

    #[error("Node '{node}' declares port '{port}' more than once")]
    DuplicatePort { node: String, port: String },

    #[error("Input '{port}' of node '{node}' is not bound to any connector")]
    Unbound { node: String, port: String },

    #[error("Node '{node}' has no {direction} port '{port}'")]
    UnknownPort {
        node: String,
        port: String,
        direction: crate::Direction,
    },

    #[error("Node handle {0} does not belong to this blueprint")]
    UnknownNode(usize),

    #[error("Input '{port}' of node '{node}' is already connected")]
    AlreadyConnected { node: String, port: String },

    #[error("Dependency cycle detected at node '{0}'")]
    Cycle(String),
}

/// Errors raised while triggering connectors or processing a node.
///
/// Every variant names the runner where the failure originated. The error is
/// passed up the trigger chain as is, so the caller of [`Runner::process`]
/// always sees the root cause.
///
/// [`Runner::process`]: crate::Runner::process
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Runner '{runner}': execution cancelled")]
    Cancelled { runner: String },

    #[error("Runner '{runner}': deadline exceeded")]
    DeadlineExceeded { runner: String },

    #[error("Runner '{runner}':\n{source}")]
    Node {
        runner: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Runner '{runner}' finished without producing output '{port}'")]
    MissingOutput { runner: String, port: String },

    #[error("Runner '{runner}': trigger depth exceeded the limit of {limit}")]
    DepthExceeded { runner: String, limit: usize },

    #[error("Runner '{runner}' is already executing (dependency cycle or overlapping cycles)")]
    Busy { runner: String },

    #[error("Runner '{runner}' was poisoned by a panicking node")]
    Poisoned { runner: String },
}

impl RunnerError {
    pub(crate) fn interrupted(runner: &str, reason: Interrupt) -> Self {
        let runner = runner.to_string();
        match reason {
            Interrupt::Cancelled => RunnerError::Cancelled { runner },
            Interrupt::DeadlineExceeded => RunnerError::DeadlineExceeded { runner },
        }
    }

    /// Name of the runner this error originated from.
    pub fn runner(&self) -> &str {
        match self {
            RunnerError::Cancelled { runner }
            | RunnerError::DeadlineExceeded { runner }
            | RunnerError::Node { runner, .. }
            | RunnerError::MissingOutput { runner, .. }
            | RunnerError::DepthExceeded { runner, .. }
            | RunnerError::Busy { runner }
            | RunnerError::Poisoned { runner } => runner,
        }
    }

    /// Returns true for cancellation and deadline failures.
    pub fn is_interrupt(&self) -> bool {
        matches!(
            self,
            RunnerError::Cancelled { .. } | RunnerError::DeadlineExceeded { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't parse configuration.\n{0}")]
    Json(#[from] serde_json::Error),
}
