//! Client for the bookstore service that owns the authoritative book records.
//!
//! The service speaks plain JSON over HTTP:
//!
//! | Method   | Path          | Success              | Missing |
//! |----------|---------------|----------------------|---------|
//! | `GET`    | `/books/{id}` | 200 + book           | 404     |
//! | `POST`   | `/books`      | 201 + book           |         |
//! | `PUT`    | `/books/{id}` | 200 + book, or 204   | 404     |
//! | `DELETE` | `/books/{id}` | 200 / 204            | 404     |
//! | `GET`    | `/health`     | 200 `{"status":"ok"}`|         |
use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{deadline::Deadline, resources::BookSpec, ErrorKind};

/// A book as stored by the bookstore service
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ExternalBook {
    pub id: String,
    pub name: String,
    pub author: String,
    pub isbn: String,
    /// Some bookstore builds emit this field capitalized
    #[serde(alias = "Genre")]
    pub genre: String,
    pub date_created: Option<DateTime<Utc>>,
    pub date_updated: Option<DateTime<Utc>>,
}

/// Mutable attributes sent on create and update
#[derive(Serialize, Debug)]
struct BookRequest<'a> {
    name: &'a str,
    author: &'a str,
    isbn: &'a str,
    genre: &'a str,
}

impl<'a> From<&'a BookSpec> for BookRequest<'a> {
    fn from(spec: &'a BookSpec) -> Self {
        Self {
            name: &spec.name,
            author: &spec.author,
            isbn: &spec.isbn,
            genre: &spec.genre,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("book {0:?} not found in the bookstore")]
    NotFound(String),

    #[error("bookstore {0} call exceeded its deadline")]
    Timeout(&'static str),

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("bookstore answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response from bookstore: {0}")]
    InvalidResponse(String),

    #[error("invalid bookstore url {0:?}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Whether retrying the same request later can succeed without anything else changing.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Timeout(_) | ClientError::Network(_) => ErrorKind::Transient,
            ClientError::Status { status, .. } if *status == 429 || *status >= 500 => {
                ErrorKind::Transient
            }
            ClientError::NotFound(_)
            | ClientError::Status { .. }
            | ClientError::InvalidResponse(_)
            | ClientError::InvalidUrl(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// CRUD against the bookstore, addressed by the bookstore-generated id.
#[async_trait]
pub trait BookApi: Send + Sync {
    /// Allocate a new record from the desired attributes.
    async fn create(&self, desired: &BookSpec, deadline: Deadline)
        -> Result<ExternalBook, ClientError>;

    /// Fails with [`ClientError::NotFound`] for unknown ids.
    async fn retrieve(&self, id: &str, deadline: Deadline) -> Result<ExternalBook, ClientError>;

    /// Replace all mutable attributes. Fails with [`ClientError::NotFound`] when the record is
    /// gone, which callers treat as a cue to recreate it.
    async fn update(
        &self,
        id: &str,
        desired: &BookSpec,
        deadline: Deadline,
    ) -> Result<ExternalBook, ClientError>;

    /// Remove a record. Implementations may report a record that is already gone either as
    /// success or as [`ClientError::NotFound`]; callers treat both as deleted.
    async fn delete(&self, id: &str, deadline: Deadline) -> Result<(), ClientError>;

    /// Check that the service is ready to take requests.
    async fn health(&self, deadline: Deadline) -> Result<(), ClientError>;
}

/// [`BookApi`] over HTTP
#[derive(Clone, Debug)]
pub struct HttpBookApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBookApi {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self, ClientError> {
        reqwest::Url::parse(base_url).map_err(|_| ClientError::InvalidUrl(base_url.into()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl BookApi for HttpBookApi {
    async fn create(
        &self,
        desired: &BookSpec,
        deadline: Deadline,
    ) -> Result<ExternalBook, ClientError> {
        let request = self
            .http
            .post(self.url("/books"))
            .json(&BookRequest::from(desired));

        within(deadline, "create", async {
            let response = success(send(request).await?, None).await?;
            let book: ExternalBook = decode(response).await?;
            if book.id.is_empty() {
                return Err(ClientError::InvalidResponse(
                    "created book has no id".into(),
                ));
            }

            Ok(book)
        })
        .await
    }

    async fn retrieve(&self, id: &str, deadline: Deadline) -> Result<ExternalBook, ClientError> {
        let request = self.http.get(self.url(&format!("/books/{id}")));

        within(deadline, "retrieve", async {
            let response = success(send(request).await?, Some(id)).await?;
            let book: ExternalBook = decode(response).await?;
            if book.id.is_empty() {
                return Err(ClientError::InvalidResponse(format!(
                    "book {id:?} came back without an id"
                )));
            }

            Ok(book)
        })
        .await
    }

    async fn update(
        &self,
        id: &str,
        desired: &BookSpec,
        deadline: Deadline,
    ) -> Result<ExternalBook, ClientError> {
        let request = self
            .http
            .put(self.url(&format!("/books/{id}")))
            .json(&BookRequest::from(desired));

        within(deadline, "update", async {
            let response = success(send(request).await?, Some(id)).await?;

            // The service may acknowledge without echoing the record back
            if response.status() == StatusCode::NO_CONTENT {
                return Ok(ExternalBook {
                    id: id.to_string(),
                    name: desired.name.clone(),
                    author: desired.author.clone(),
                    isbn: desired.isbn.clone(),
                    genre: desired.genre.clone(),
                    date_created: None,
                    date_updated: Some(Utc::now()),
                });
            }

            let mut book: ExternalBook = decode(response).await?;
            if book.id.is_empty() {
                book.id = id.to_string();
            }

            Ok(book)
        })
        .await
    }

    async fn delete(&self, id: &str, deadline: Deadline) -> Result<(), ClientError> {
        let request = self.http.delete(self.url(&format!("/books/{id}")));

        within(deadline, "delete", async {
            match success(send(request).await?, Some(id)).await {
                Ok(_) => Ok(()),
                Err(ClientError::NotFound(_)) => {
                    debug!(id, "book already gone from the bookstore");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn health(&self, deadline: Deadline) -> Result<(), ClientError> {
        #[derive(Deserialize)]
        struct Health {
            status: String,
        }

        let request = self.http.get(self.url("/health"));

        within(deadline, "health", async {
            let response = success(send(request).await?, None).await?;
            let health: Health = decode(response).await?;
            if health.status != "ok" {
                return Err(ClientError::Status {
                    status: StatusCode::OK.as_u16(),
                    message: health.status,
                });
            }

            Ok(())
        })
        .await
    }
}

async fn within<T>(
    deadline: Deadline,
    operation: &'static str,
    call: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    deadline
        .run(call)
        .await
        .unwrap_or(Err(ClientError::Timeout(operation)))
}

async fn send(request: RequestBuilder) -> Result<Response, ClientError> {
    request.send().await.map_err(ClientError::Network)
}

/// Pass through 2xx responses, turning everything else into a [`ClientError`].
async fn success(response: Response, id: Option<&str>) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND {
        if let Some(id) = id {
            return Err(ClientError::NotFound(id.to_string()));
        }
    }

    // Error bodies look like {"error": "...", "fields": [...]}
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or(body);

    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let bytes = response.bytes().await.map_err(ClientError::Network)?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}
