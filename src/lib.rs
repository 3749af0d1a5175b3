use thiserror::Error;

/// Expose all controller components used by main
pub mod operator;
pub mod resources;

/// Reconciliation of books against the bookstore
pub mod reconcilers;

/// Client for the bookstore service
pub mod bookstore_api;

/// Access to books stored in kubernetes
pub mod store;

pub mod config;
pub mod deadline;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
pub(crate) mod fixtures;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Conflict writing {0}: resource version is stale")]
    ConflictOnPersist(String),

    #[error("Store call for {0} exceeded its deadline")]
    StoreTimeout(String),

    #[error("Bookstore Error: {0}")]
    ExternalError(#[from] bookstore_api::ClientError),

    #[error("Invalid book spec: {0}")]
    InvalidSpec(String),

    #[error("IllegalBook: {0}")]
    IllegalBook(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How a failed reconciliation should be retried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network trouble, timeouts or server-side failures
    Transient,
    /// Will keep failing until the book spec (or the bookstore) changes
    Permanent,
    /// Optimistic concurrency conflict; re-read on the next pass
    Conflict,
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::SerializationError(_) => "serialization",
            Error::KubeError(_) => "kube",
            Error::ConflictOnPersist(_) => "conflict",
            Error::StoreTimeout(_) => "store_timeout",
            Error::ExternalError(e) => match e.kind() {
                ErrorKind::Transient => "external_transient",
                _ => "external_permanent",
            },
            Error::InvalidSpec(_) => "invalid_spec",
            Error::IllegalBook(_) => "illegal_book",
        }
        .into()
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConflictOnPersist(_) => ErrorKind::Conflict,
            Error::ExternalError(e) => e.kind(),
            Error::KubeError(kube::Error::Api(ae)) if ae.code < 500 && ae.code != 429 => {
                ErrorKind::Permanent
            }
            Error::KubeError(_) | Error::StoreTimeout(_) => ErrorKind::Transient,
            Error::SerializationError(_) | Error::InvalidSpec(_) | Error::IllegalBook(_) => {
                ErrorKind::Permanent
            }
        }
    }
}
