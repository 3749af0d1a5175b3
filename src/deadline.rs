use std::{future::Future, time::Duration};

use tokio::time::{error::Elapsed, Instant};

/// Point in time by which a single call against the store or the bookstore must finish.
///
/// Deadlines are handed to every operation explicitly instead of being implied by an
/// ambient client-wide timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Drive `fut` to completion unless the deadline passes first.
    pub async fn run<F: Future>(self, fut: F) -> Result<F::Output, Elapsed> {
        tokio::time::timeout_at(self.0, fut).await
    }
}
