use std::sync::Arc;

use async_trait::async_trait;
use kube::{
    runtime::{controller::Action, reflector::ObjectRef},
    CustomResourceExt, Resource,
};

use crate::{
    bookstore_api::BookApi, config::ReconcileSettings, deadline::Deadline, store::BookStore,
    Error, Metrics,
};

pub mod backoff;
pub mod book;
pub mod drift;
pub mod finalizers;

use backoff::RetryTracker;

/// The context passed around
pub struct Context {
    /// Where desired books are read from and status is written to
    pub store: Arc<dyn BookStore>,

    /// The bookstore holding the authoritative records
    pub api: Arc<dyn BookApi>,

    /// Timeouts, requeue delays and backoff
    pub settings: ReconcileSettings,

    /// Prometheus metrics
    pub metrics: Metrics,

    /// Consecutive failures per book, driving the error backoff
    pub retries: RetryTracker,
}

impl Context {
    pub fn new(
        store: Arc<dyn BookStore>,
        api: Arc<dyn BookApi>,
        settings: ReconcileSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            api,
            settings,
            metrics,
            retries: RetryTracker::default(),
        }
    }

    /// A fresh deadline for one outbound call
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.settings.call_timeout)
    }
}

/// How a successful pass ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the object changes
    Done,
    /// The bookstore record is gone and our finalizer was released
    Released,
    /// The bookstore was just changed; look again shortly
    Converging,
    /// The bookstore matches the spec; check again at the resync interval
    InSync,
}

impl Outcome {
    pub fn requeue(&self) -> bool {
        !matches!(self, Outcome::Done | Outcome::Released)
    }

    pub fn into_action(self, settings: &ReconcileSettings) -> Action {
        match self {
            Outcome::Done | Outcome::Released => Action::await_change(),
            Outcome::Converging => Action::requeue(settings.converge_requeue),
            Outcome::InSync => Action::requeue(settings.resync_interval),
        }
    }
}

/// A resource that can be reconciled by a controller
#[async_trait]
pub trait Reconcile
where
    Self: CustomResourceExt + Resource<DynamicType = ()> + Sized,
{
    type Context;

    /// Run one level-triggered pass for the object behind `key`.
    ///
    /// The object is always re-read, so the pass never relies on the event that
    /// triggered it.
    async fn reconcile(key: &ObjectRef<Self>, context: Arc<Self::Context>)
        -> Result<Outcome, Error>;
}
