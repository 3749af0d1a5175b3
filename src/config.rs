use std::{net::SocketAddr, time::Duration};

use clap::Parser;

/// Command line and environment configuration of the operator
#[derive(Parser, Debug, Clone)]
#[command(name = "operator", version, about = "Keeps Book resources in sync with the bookstore")]
pub struct OperatorConfig {
    /// Base url of the bookstore service, e.g. http://bookstore.default.svc:8000
    #[arg(long, env = "BOOKSTORE_URL")]
    pub bookstore_url: String,

    /// Address of the metrics and diagnostics server
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Only watch books in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Deadline for each call to the bookstore or the kubernetes API
    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value_t = 10)]
    pub call_timeout_secs: u64,

    /// Delay before checking a book again after changing it in the bookstore
    #[arg(long, env = "CONVERGE_REQUEUE_SECS", default_value_t = 5)]
    pub converge_requeue_secs: u64,

    /// Delay before re-checking a book that is in sync
    #[arg(long, env = "RESYNC_SECS", default_value_t = 300)]
    pub resync_secs: u64,

    /// First retry delay after a transient failure
    #[arg(long, env = "BACKOFF_BASE_SECS", default_value_t = 1)]
    pub backoff_base_secs: u64,

    /// First retry delay after a failure that needs a spec change to clear
    #[arg(long, env = "PERMANENT_BACKOFF_BASE_SECS", default_value_t = 30)]
    pub permanent_backoff_base_secs: u64,

    /// Upper bound for retry delays
    #[arg(long, env = "BACKOFF_CAP_SECS", default_value_t = 300)]
    pub backoff_cap_secs: u64,
}

impl OperatorConfig {
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            converge_requeue: Duration::from_secs(self.converge_requeue_secs),
            resync_interval: Duration::from_secs(self.resync_secs),
            backoff: BackoffSettings {
                base: Duration::from_secs(self.backoff_base_secs),
                permanent_base: Duration::from_secs(self.permanent_backoff_base_secs),
                cap: Duration::from_secs(self.backoff_cap_secs),
            },
        }
    }
}

/// Knobs of a single reconciler, built once and handed to its context
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileSettings {
    pub call_timeout: Duration,
    pub converge_requeue: Duration,
    pub resync_interval: Duration,
    pub backoff: BackoffSettings,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackoffSettings {
    pub base: Duration,
    pub permanent_base: Duration,
    pub cap: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            converge_requeue: Duration::from_secs(5),
            resync_interval: Duration::from_secs(300),
            backoff: BackoffSettings::default(),
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            permanent_base: Duration::from_secs(30),
            cap: Duration::from_secs(300),
        }
    }
}
