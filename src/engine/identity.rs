use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Process-wide unique identity of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnerId(Uuid);

impl RunnerId {
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for RunnerId {
    fn from(value: Uuid) -> Self {
        RunnerId(value)
    }
}

impl Display for RunnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Source of runner identities.
///
/// Implementations only promise that every value handed out is unique for
/// the lifetime of the process. A single generator instance is passed to
/// every runner construction, it is never reached through a global.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> RunnerId;
}

/// Random version 4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> RunnerId {
        RunnerId(Uuid::new_v4())
    }
}

/// Monotonic counter encoded as UUIDs, starting at 1.
///
/// Yields the same identities on every run, which keeps names reproducible
/// in logs and tests.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> RunnerId {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        RunnerId(Uuid::from_u128(n as u128))
    }
}
