//! In-memory stand-ins for the kubernetes store and the bookstore service.
use std::{collections::HashMap, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use chrono::Utc;
use kube::{runtime::reflector::ObjectRef, ResourceExt};
use uuid::Uuid;

use crate::{
    bookstore_api::{BookApi, ClientError, ExternalBook},
    config::ReconcileSettings,
    deadline::Deadline,
    reconcilers::Context,
    resources::{Book, BookSpec},
    store::BookStore,
    Error, Metrics, Result,
};

/// An empty book in the default namespace
pub fn book_named(name: &str) -> Book {
    let mut book = Book::new(name, BookSpec::default());
    book.metadata.namespace = Some("default".into());
    book
}

pub fn funny_book() -> Book {
    let mut book = book_named("funny-book");
    book.spec = BookSpec {
        name: "Funny Book".into(),
        author: "Mike".into(),
        isbn: "123456".into(),
        genre: "funny".into(),
    };
    book
}

pub fn test_context(store: Arc<FakeBookStore>, api: Arc<FakeBookApi>) -> Arc<Context> {
    Arc::new(Context::new(
        store,
        api,
        ReconcileSettings::default(),
        Metrics::default(),
    ))
}

fn not_found(name: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".into(),
        message: format!("books \"{name}\" not found"),
        reason: "NotFound".into(),
        code: 404,
    }))
}

#[derive(Default)]
struct StoreState {
    books: HashMap<ObjectRef<Book>, Book>,
    version: u64,
    conflict_next: bool,
    status_writes: usize,
    finalizer_writes: usize,
}

impl StoreState {
    fn next_version(&mut self) -> Option<String> {
        self.version += 1;
        Some(self.version.to_string())
    }

    /// Find the stored copy `book` was read from, enforcing the version token
    fn current(&mut self, book: &Book) -> Result<&mut Book> {
        if std::mem::take(&mut self.conflict_next) {
            return Err(Error::ConflictOnPersist(book.name_any()));
        }

        let stored = self
            .books
            .get_mut(&ObjectRef::from_obj(book))
            .ok_or_else(|| not_found(&book.name_any()))?;
        if stored.metadata.resource_version != book.metadata.resource_version {
            return Err(Error::ConflictOnPersist(book.name_any()));
        }

        Ok(stored)
    }
}

/// A [`BookStore`] with optimistic concurrency, dropping objects once they are deleted and
/// hold no finalizers
#[derive(Default)]
pub struct FakeBookStore {
    state: Mutex<StoreState>,
}

impl FakeBookStore {
    /// Create or overwrite a book, as its owner would
    pub fn insert(&self, mut book: Book) {
        let mut state = self.state.lock().unwrap();
        book.metadata.resource_version = state.next_version();
        state.books.insert(ObjectRef::from_obj(&book), book);
    }

    pub fn get_book(&self, key: &ObjectRef<Book>) -> Option<Book> {
        self.state.lock().unwrap().books.get(key).cloned()
    }

    pub fn conflict_next_write(&self) {
        self.state.lock().unwrap().conflict_next = true;
    }

    pub fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }

    pub fn finalizer_writes(&self) -> usize {
        self.state.lock().unwrap().finalizer_writes
    }
}

#[async_trait]
impl BookStore for FakeBookStore {
    async fn get(&self, key: &ObjectRef<Book>, _deadline: Deadline) -> Result<Option<Book>> {
        Ok(self.get_book(key))
    }

    async fn persist_finalizers(&self, book: &Book, _deadline: Deadline) -> Result<Book> {
        let mut state = self.state.lock().unwrap();
        let version = state.version + 1;
        let stored = state.current(book)?;
        stored.metadata.finalizers = book.metadata.finalizers.clone();
        stored.metadata.resource_version = Some(version.to_string());
        let stored = stored.clone();

        state.version = version;
        state.finalizer_writes += 1;
        if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
            state.books.remove(&ObjectRef::from_obj(&stored));
        }

        Ok(stored)
    }

    async fn persist_status(&self, book: &Book, _deadline: Deadline) -> Result<Book> {
        let mut state = self.state.lock().unwrap();
        let version = state.version + 1;
        let stored = state.current(book)?;
        stored.status = book.status.clone();
        stored.metadata.resource_version = Some(version.to_string());
        let stored = stored.clone();

        state.version = version;
        state.status_writes += 1;
        Ok(stored)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Retrieve,
    Update,
    Delete,
    Health,
}

#[derive(Default)]
struct ApiState {
    books: HashMap<String, ExternalBook>,
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, ClientError>,
}

impl ApiState {
    /// Count the call and hand out an injected failure, if any
    fn call(&mut self, op: Op) -> Result<(), ClientError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.remove(&op) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A bookstore keeping records in memory and counting calls
#[derive(Default)]
pub struct FakeBookApi {
    state: Mutex<ApiState>,
}

impl FakeBookApi {
    /// Make the next call of `op` fail with `error`
    pub fn fail_next(&self, op: Op, error: ClientError) {
        self.state.lock().unwrap().failures.insert(op, error);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().unwrap().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn book_count(&self) -> usize {
        self.state.lock().unwrap().books.len()
    }

    pub fn stored(&self, id: &str) -> Option<ExternalBook> {
        self.state.lock().unwrap().books.get(id).cloned()
    }

    /// Drop a record without telling anyone
    pub fn forget(&self, id: &str) {
        self.state.lock().unwrap().books.remove(id);
    }

    /// Edit a record without telling anyone
    pub fn tamper(&self, id: &str, edit: impl FnOnce(&mut ExternalBook)) {
        if let Some(book) = self.state.lock().unwrap().books.get_mut(id) {
            edit(book);
        }
    }
}

#[async_trait]
impl BookApi for FakeBookApi {
    async fn create(
        &self,
        desired: &BookSpec,
        _deadline: Deadline,
    ) -> Result<ExternalBook, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.call(Op::Create)?;

        let now = Utc::now();
        let book = ExternalBook {
            id: Uuid::new_v4().to_string(),
            name: desired.name.clone(),
            author: desired.author.clone(),
            isbn: desired.isbn.clone(),
            genre: desired.genre.clone(),
            date_created: Some(now),
            date_updated: Some(now),
        };
        state.books.insert(book.id.clone(), book.clone());
        Ok(book)
    }

    async fn retrieve(&self, id: &str, _deadline: Deadline) -> Result<ExternalBook, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.call(Op::Retrieve)?;

        state
            .books
            .get(id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(id.into()))
    }

    async fn update(
        &self,
        id: &str,
        desired: &BookSpec,
        _deadline: Deadline,
    ) -> Result<ExternalBook, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.call(Op::Update)?;

        let book = state
            .books
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(id.into()))?;
        book.name = desired.name.clone();
        book.author = desired.author.clone();
        book.isbn = desired.isbn.clone();
        book.genre = desired.genre.clone();
        book.date_updated = Some(Utc::now());
        Ok(book.clone())
    }

    async fn delete(&self, id: &str, _deadline: Deadline) -> Result<(), ClientError> {
        let mut state = self.state.lock().unwrap();
        state.call(Op::Delete)?;

        state
            .books
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(id.into()))
    }

    async fn health(&self, _deadline: Deadline) -> Result<(), ClientError> {
        self.state.lock().unwrap().call(Op::Health)
    }
}
