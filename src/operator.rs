use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::Action,
        events::{Event, EventType, Recorder, Reporter},
        reflector::ObjectRef,
        watcher::Config,
        Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, field, info, instrument, warn, Span};

use crate::{
    bookstore_api::{BookApi, HttpBookApi},
    config::OperatorConfig,
    deadline::Deadline,
    reconcilers::{backoff::compute_backoff, Context, Outcome, Reconcile},
    resources::Book,
    store::KubeBookStore,
    telemetry, Error, ErrorKind, Metrics, Result,
};

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "bookstore-operator".into(),
        }
    }
}
impl Diagnostics {
    pub fn recorder(&self, client: Client, book: &Book) -> Recorder {
        Recorder::new(client, self.reporter.clone(), book.object_ref(&()))
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub(crate) fn to_context(
        &self,
        client: Client,
        reconciler: Arc<Context>,
    ) -> Arc<OperatorContext> {
        Arc::new(OperatorContext {
            client,
            diagnostics: self.diagnostics.clone(),
            reconciler,
        })
    }
}

/// What the controller hands to every reconciliation
pub struct OperatorContext {
    /// Kubernetes client, used for publishing events
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Everything the book reconciler needs
    pub reconciler: Arc<Context>,
}

pub struct BookController {
    state: State,
    config: OperatorConfig,
}

impl BookController {
    pub fn new(state: State, config: OperatorConfig) -> Self {
        Self { state, config }
    }

    /// Initialize the controller and shared state (given the crd is installed)
    pub async fn run(self) -> Result<(), anyhow::Error> {
        // Error handler for failed reconciliations
        fn error_policy(book: Arc<Book>, error: &Error, ctx: Arc<OperatorContext>) -> Action {
            ctx.reconciler.metrics.reconcile_failure(&book, error);
            retry_after(&ObjectRef::from_obj(book.as_ref()), error, &ctx.reconciler)
        }

        let settings = self.config.reconcile_settings();

        // Get a k8s client for communicating with the cluster
        let client = Client::try_default()
            .await
            .context("failed to create kube Client")?;

        let books: Api<Book> = match &self.config.namespace {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };

        // Test that we can actually query for our CRD (a.k.a. it is installed)
        if let Err(e) = books.list(&ListParams::default().limit(1)).await {
            error!("CRD is not queryable; {e:?}. Is the CRD installed?");
            info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            return Err(e).context("Book CRD is not installed");
        }

        let api = HttpBookApi::new(&self.config.bookstore_url)?;
        match api.health(Deadline::after(settings.call_timeout)).await {
            Ok(()) => info!("bookstore at {} is healthy", self.config.bookstore_url),
            // Reconciliations back off on their own until the bookstore shows up
            Err(e) => warn!("bookstore at {} is not healthy: {e}", self.config.bookstore_url),
        }

        let metrics = Metrics::default().register(&self.state.registry)?;
        let reconciler = Arc::new(Context::new(
            Arc::new(KubeBookStore::new(client.clone())),
            Arc::new(api),
            settings,
            metrics,
        ));

        // Create a new k8s controller for our CRD resources
        let watching_config = Config::default().any_semantic();
        Controller::new(books, watching_config)
            .shutdown_on_signal()
            .run(
                reconcile,
                error_policy,
                self.state.to_context(client, reconciler),
            )
            .filter_map(|x| async move { Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .await;

        Ok(())
    }
}

/// Reconcile one book, recording metrics, diagnostics and events around the pass
#[instrument(skip(ctx, book), fields(trace_id))]
async fn reconcile(book: Arc<Book>, ctx: Arc<OperatorContext>) -> Result<Action> {
    // Add some tracing for debugging's sake
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    // Take some metrics to see the average reconcile time
    let _timer = ctx.reconciler.metrics.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let key = ObjectRef::from_obj(book.as_ref());
    info!(r#"Starting Book reconciliation for "{key}""#);

    match Book::reconcile(&key, ctx.reconciler.clone()).await {
        Ok(outcome) => {
            if outcome == Outcome::Released {
                publish(&ctx, &book, Event {
                    type_: EventType::Normal,
                    reason: "Finalized".into(),
                    note: Some(format!("Released `{}` from the bookstore", book.name_any())),
                    action: "Deleting".into(),
                    secondary: None,
                })
                .await;
            }

            Ok(settle(&key, outcome, &ctx.reconciler))
        }
        Err(e) => {
            if e.kind() == ErrorKind::Permanent {
                publish(&ctx, &book, Event {
                    type_: EventType::Warning,
                    reason: "ReconcileFailed".into(),
                    note: Some(e.to_string()),
                    action: "Reconciling".into(),
                    secondary: None,
                })
                .await;
            }

            Err(e)
        }
    }
}

/// A successful pass starts the backoff sequence over
fn settle(key: &ObjectRef<Book>, outcome: Outcome, ctx: &Context) -> Action {
    ctx.retries.reset(key);
    outcome.into_action(&ctx.settings)
}

/// Count the failure against the book and back off accordingly
fn retry_after(key: &ObjectRef<Book>, error: &Error, ctx: &Context) -> Action {
    let attempt = ctx.retries.increment(key);
    let delay = compute_backoff(attempt, error.kind(), &ctx.settings.backoff);

    warn!(
        "reconcile of {key} failed (attempt {attempt}), retrying in {}s: {error}",
        delay.as_secs()
    );
    Action::requeue(delay)
}

/// Events are informational, a failure to publish one never fails the pass
async fn publish(ctx: &OperatorContext, book: &Book, event: Event) {
    let recorder = ctx
        .diagnostics
        .read()
        .await
        .recorder(ctx.client.clone(), book);

    if let Err(e) = recorder.publish(event).await {
        warn!("failed to publish event for book '{}': {e}", book.name_any());
    }
}
