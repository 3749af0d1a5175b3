use std::{collections::HashMap, sync::Mutex, time::Duration};

use kube::runtime::reflector::ObjectRef;

use crate::{config::BackoffSettings, resources::Book, ErrorKind};

/// Consecutive failed passes per book.
///
/// The error policy of the controller is synchronous, so this uses a std mutex.
#[derive(Default, Debug)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<ObjectRef<Book>, u32>>,
}

impl RetryTracker {
    /// Record another failure and return the attempt count, starting at 1.
    pub fn increment(&self, key: &ObjectRef<Book>) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let attempt = attempts.entry(key.clone()).or_insert(0);
        *attempt = attempt.saturating_add(1);
        *attempt
    }

    pub fn reset(&self, key: &ObjectRef<Book>) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.remove(key);
    }

    pub fn attempts(&self, key: &ObjectRef<Book>) -> u32 {
        let attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.get(key).copied().unwrap_or(0)
    }
}

/// Delay before retrying after `attempt` consecutive failures.
///
/// Doubles from the base delay for the error kind and never exceeds the cap.
pub fn compute_backoff(attempt: u32, kind: ErrorKind, settings: &BackoffSettings) -> Duration {
    let base = match kind {
        ErrorKind::Transient | ErrorKind::Conflict => settings.base,
        ErrorKind::Permanent => settings.permanent_base,
    };

    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .unwrap_or(settings.cap)
        .min(settings.cap)
}
