use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::{Config, DEFAULT_MAX_DEPTH};
use crate::error::Interrupt;

/// Execution context shared by the runners of one graph.
///
/// A `Context` carries cancellation, an optional deadline and the bound on
/// recursive triggering. Clones share all of it: cancelling any clone, or
/// moving the deadline through any clone, is observed by every runner built
/// from the same context.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Arc<RwLock<Option<Instant>>>,
    max_depth: usize,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Arc::new(RwLock::new(None)),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new().with_max_depth(config.max_depth)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_deadline(Some(Instant::now() + timeout));
        self
    }

    /// Creates a context which is cancelled together with `self`, but which
    /// can also be cancelled on its own. The deadline is not shared.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: Arc::new(RwLock::new(self.deadline())),
            max_depth: self.max_depth,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_deadline(&self, deadline: Option<Instant>) {
        *self.deadline.write().unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Fails if the context was cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }

        if let Some(deadline) = self.deadline()
            && Instant::now() >= deadline
        {
            return Err(Interrupt::DeadlineExceeded);
        }

        Ok(())
    }
}
