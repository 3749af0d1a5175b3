use async_trait::async_trait;
use kube::{
    api::{Patch, PatchParams},
    runtime::reflector::ObjectRef,
    Api, Client, ResourceExt,
};
use serde_json::json;
use tracing::debug;

use crate::{deadline::Deadline, resources::Book, Error, Result};

/// Where desired books live.
///
/// Writes carry the version token of the object they were computed from; a stale token is
/// rejected with [`Error::ConflictOnPersist`] rather than retried here.
#[async_trait]
pub trait BookStore: Send + Sync {
    /// Fetch the current object, `None` when it no longer exists.
    async fn get(&self, key: &ObjectRef<Book>, deadline: Deadline) -> Result<Option<Book>>;

    /// Write `metadata.finalizers` of `book`, returning the stored object.
    async fn persist_finalizers(&self, book: &Book, deadline: Deadline) -> Result<Book>;

    /// Replace the status of `book` as a whole, returning the stored object.
    async fn persist_status(&self, book: &Book, deadline: Deadline) -> Result<Book>;
}

/// [`BookStore`] backed by the kubernetes API server
#[derive(Clone)]
pub struct KubeBookStore {
    client: Client,
}

impl KubeBookStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: Option<&str>, name: &str) -> Result<Api<Book>> {
        let namespace = namespace
            .ok_or_else(|| Error::IllegalBook(format!("{name}: missing namespace")))?;

        Ok(Api::namespaced(self.client.clone(), namespace))
    }

    fn api_for(&self, book: &Book) -> Result<Api<Book>> {
        self.api(book.namespace().as_deref(), &book.name_any())
    }
}

#[async_trait]
impl BookStore for KubeBookStore {
    async fn get(&self, key: &ObjectRef<Book>, deadline: Deadline) -> Result<Option<Book>> {
        let books = self.api(key.namespace.as_deref(), &key.name)?;

        deadline
            .run(books.get_opt(&key.name))
            .await
            .map_err(|_| Error::StoreTimeout(key.to_string()))?
            .map_err(Error::KubeError)
    }

    async fn persist_finalizers(&self, book: &Book, deadline: Deadline) -> Result<Book> {
        let books = self.api_for(book)?;
        let name = book.name_any();

        debug!(finalizers = ?book.finalizers(), "persisting finalizers of {name}");
        let patch = Patch::Merge(json!({
            "metadata": {
                "resourceVersion": book.resource_version(),
                "finalizers": book.finalizers(),
            },
        }));

        deadline
            .run(books.patch(&name, &PatchParams::default(), &patch))
            .await
            .map_err(|_| Error::StoreTimeout(name.clone()))?
            .map_err(|e| conflict_or_kube(e, &name))
    }

    async fn persist_status(&self, book: &Book, deadline: Deadline) -> Result<Book> {
        let books = self.api_for(book)?;
        let name = book.name_any();

        let status = serde_json::to_value(&book.status).map_err(Error::SerializationError)?;
        let patch = Patch::Merge(json!({
            "metadata": {
                "resourceVersion": book.resource_version(),
            },
            "status": status,
        }));

        deadline
            .run(books.patch_status(&name, &PatchParams::default(), &patch))
            .await
            .map_err(|_| Error::StoreTimeout(name.clone()))?
            .map_err(|e| conflict_or_kube(e, &name))
    }
}

fn conflict_or_kube(error: kube::Error, name: &str) -> Error {
    match error {
        kube::Error::Api(ae) if ae.code == 409 => Error::ConflictOnPersist(name.to_string()),
        e => Error::KubeError(e),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_json_diff::assert_json_include;
    use http::{Method, Request, Response, StatusCode};
    use hyper::Body;
    use serde_json::Value;

    use super::*;
    use crate::fixtures::book_named;

    type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

    fn mock_store() -> (KubeBookStore, ApiServerHandle) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let client = Client::new(mock_service, "default");
        (KubeBookStore::new(client), handle)
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn status_response(code: u16, reason: &str) -> Response<Body> {
        let body = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("books \"funny-book\" {reason}"),
            "reason": reason,
            "code": code,
        });
        Response::builder()
            .status(StatusCode::from_u16(code).unwrap())
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn missing_book_is_none() {
        let (store, mut handle) = mock_store();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), Method::GET);
            assert_eq!(
                request.uri().path(),
                "/apis/bookstore.com/v1/namespaces/default/books/funny-book"
            );
            send.send_response(status_response(404, "NotFound"));
        });

        let key = ObjectRef::new("funny-book").within("default");
        let found = store.get(&key, deadline()).await.unwrap();
        assert!(found.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn status_write_carries_resource_version() {
        let (store, mut handle) = mock_store();
        let mut book = book_named("funny-book");
        book.metadata.resource_version = Some("41".into());
        book.status = Some(Default::default());

        let reply = book.clone();
        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), Method::PATCH);
            assert_eq!(
                request.uri().path(),
                "/apis/bookstore.com/v1/namespaces/default/books/funny-book/status"
            );
            let body = hyper::body::to_bytes(request.into_body()).await.unwrap();
            let body: Value = serde_json::from_slice(&body).unwrap();
            assert_json_include!(
                actual: body,
                expected: json!({
                    "metadata": { "resourceVersion": "41" },
                    "status": { "externalID": "", "createdAt": null },
                })
            );
            send.send_response(
                Response::builder()
                    .body(Body::from(serde_json::to_vec(&reply).unwrap()))
                    .unwrap(),
            );
        });

        let stored = store.persist_status(&book, deadline()).await.unwrap();
        assert_eq!(stored.name_any(), "funny-book");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn stale_finalizer_write_is_a_conflict() {
        let (store, mut handle) = mock_store();
        let mut book = book_named("funny-book");
        book.metadata.resource_version = Some("7".into());
        book.metadata.finalizers = Some(vec!["books.finalizer.bookstore.com".into()]);

        let server = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), Method::PATCH);
            let body = hyper::body::to_bytes(request.into_body()).await.unwrap();
            let body: Value = serde_json::from_slice(&body).unwrap();
            assert_json_include!(
                actual: body,
                expected: json!({
                    "metadata": {
                        "resourceVersion": "7",
                        "finalizers": ["books.finalizer.bookstore.com"],
                    },
                })
            );
            send.send_response(status_response(409, "Conflict"));
        });

        let result = store.persist_finalizers(&book, deadline()).await;
        assert!(matches!(result, Err(Error::ConflictOnPersist(name)) if name == "funny-book"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn book_without_namespace_is_rejected() {
        let (store, _handle) = mock_store();
        let mut book = book_named("funny-book");
        book.metadata.namespace = None;

        let result = store.persist_status(&book, deadline()).await;
        assert!(matches!(result, Err(Error::IllegalBook(_))));
    }
}
