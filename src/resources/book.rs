use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{bookstore_api::ExternalBook, Error, Result};

/// A book kept in sync with the bookstore service
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "Book",
    group = "bookstore.com",
    version = "v1",
    status = "BookStatus",
    doc = "A book whose record in the bookstore service is managed by the operator",
    namespaced,
    printcolumn = r#"{ "name": "external id", "type": "string", "description": "id of the book in the bookstore", "jsonPath": ".status.externalID" }"#,
    printcolumn = r#"{ "name": "author", "type": "string", "description": "observed author", "jsonPath": ".status.author" }"#,
    printcolumn = r#"{ "name": "updated", "type": "date", "description": "last update in the bookstore", "jsonPath": ".status.updatedAt" }"#
)]
#[serde(default)]
pub struct BookSpec {
    /// Title of the book. Required by the bookstore.
    pub name: String,

    pub author: String,
    pub isbn: String,
    pub genre: String,
}

/// What the operator last saw in the bookstore.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookStatus {
    /// The bookstore-internal ID. Empty until the book has been created.
    #[serde(rename = "externalID", default)]
    pub external_id: String,

    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub genre: String,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BookSpec {
    /// Reject specs the bookstore would refuse anyway.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidSpec("spec.name is required".into()));
        }

        Ok(())
    }
}

impl BookStatus {
    /// Status mirroring a record read back from the bookstore
    pub fn observed(book: &ExternalBook) -> Self {
        Self {
            external_id: book.id.clone(),
            name: book.name.clone(),
            author: book.author.clone(),
            isbn: book.isbn.clone(),
            genre: book.genre.clone(),
            created_at: book.date_created,
            updated_at: book.date_updated,
        }
    }

    pub fn is_created(&self) -> bool {
        !self.external_id.is_empty()
    }
}
