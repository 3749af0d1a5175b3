use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kube::{runtime::reflector::ObjectRef, Resource as _, ResourceExt as _};
use tracing::{debug, info, warn};

use crate::{
    bookstore_api::ClientError,
    resources::{Book, BookStatus},
    Error, Result,
};

use super::{
    drift,
    finalizers::{self, BOOK_FINALIZER},
    Context, Outcome, Reconcile,
};

#[async_trait]
impl Reconcile for Book {
    type Context = Context;

    async fn reconcile(key: &ObjectRef<Book>, ctx: Arc<Context>) -> Result<Outcome, Error> {
        let Some(book) = ctx.store.get(key, ctx.deadline()).await? else {
            info!("Book {key} not found, ignoring since it must have been deleted");
            ctx.retries.reset(key);
            return Ok(Outcome::Done);
        };

        if book.meta().deletion_timestamp.is_some() {
            return finalize(book, &ctx).await;
        }

        let book = register_finalizer(book, &ctx).await?;
        sync(book, &ctx).await
    }
}

/// Make sure deletion of the book waits for our cleanup.
async fn register_finalizer(mut book: Book, ctx: &Context) -> Result<Book> {
    if !finalizers::ensure_present(&mut book, BOOK_FINALIZER) {
        return Ok(book);
    }

    debug!("Adding finalizer to book '{}'", book.name_any());
    ctx.store.persist_finalizers(&book, ctx.deadline()).await
}

/// Remove the bookstore record, then release the object for deletion.
async fn finalize(mut book: Book, ctx: &Context) -> Result<Outcome> {
    let name = book.name_any();
    if !finalizers::contains(&book, BOOK_FINALIZER) {
        debug!("Book '{name}' is being deleted and holds no finalizer of ours");
        return Ok(Outcome::Done);
    }

    let external_id = book
        .status
        .as_ref()
        .map(|s| s.external_id.clone())
        .unwrap_or_default();

    if external_id.is_empty() {
        info!("Book '{name}' was never created in the bookstore, nothing to clean up");
    } else {
        info!("Deleting book '{name}' ({external_id}) from the bookstore");
        match ctx.api.delete(&external_id, ctx.deadline()).await {
            Ok(()) => ctx.metrics.external_action("delete"),
            Err(ClientError::NotFound(_)) => {
                info!("Book '{name}' ({external_id}) was already gone from the bookstore");
            }
            Err(e) => {
                // Keeping the finalizer blocks deletion until the record is really gone
                warn!("Deleting book '{name}' ({external_id}) failed, keeping finalizer: {e}");
                return Err(e.into());
            }
        }
    }

    finalizers::remove(&mut book, BOOK_FINALIZER);
    ctx.store.persist_finalizers(&book, ctx.deadline()).await?;

    Ok(Outcome::Released)
}

/// Converge the bookstore record towards the spec.
async fn sync(book: Book, ctx: &Context) -> Result<Outcome> {
    let status = book.status.clone().unwrap_or_default();

    if !status.is_created() {
        return create(book, ctx).await;
    }

    let drifted = drift::drifted_fields(&book.spec, &status);
    if !drifted.is_empty() {
        let fields: Vec<String> = drifted.iter().map(ToString::to_string).collect();
        info!(
            "Book '{}' drifted on [{}], updating the bookstore",
            book.name_any(),
            fields.join(", ")
        );
        return update(book, status, ctx).await;
    }

    confirm(book, status, ctx).await
}

async fn create(mut book: Book, ctx: &Context) -> Result<Outcome> {
    book.spec.validate()?;

    info!("Creating book '{}' in the bookstore", book.name_any());
    let observed = ctx.api.create(&book.spec, ctx.deadline()).await?;
    ctx.metrics.external_action("create");

    info!(
        "Created book '{}' as {} in the bookstore",
        book.name_any(),
        observed.id
    );
    book.status = Some(BookStatus::observed(&observed));
    ctx.store.persist_status(&book, ctx.deadline()).await?;

    Ok(Outcome::Converging)
}

async fn update(mut book: Book, status: BookStatus, ctx: &Context) -> Result<Outcome> {
    book.spec.validate()?;

    let observed = match ctx
        .api
        .update(&status.external_id, &book.spec, ctx.deadline())
        .await
    {
        Ok(observed) => observed,
        Err(ClientError::NotFound(_)) => {
            warn!(
                "Book '{}' ({}) vanished from the bookstore, recreating it",
                book.name_any(),
                status.external_id
            );
            return create(book, ctx).await;
        }
        Err(e) => return Err(e.into()),
    };
    ctx.metrics.external_action("update");

    // The record keeps its identity and creation time across updates
    book.status = Some(BookStatus {
        external_id: status.external_id,
        created_at: status.created_at,
        updated_at: Some(observed.date_updated.unwrap_or_else(Utc::now)),
        ..BookStatus::observed(&observed)
    });
    ctx.store.persist_status(&book, ctx.deadline()).await?;

    Ok(Outcome::Converging)
}

/// Check that the record still exists, recreating it when it cannot be read back.
async fn confirm(mut book: Book, status: BookStatus, ctx: &Context) -> Result<Outcome> {
    let observed = match ctx.api.retrieve(&status.external_id, ctx.deadline()).await {
        Ok(observed) => observed,
        Err(e) => {
            warn!(
                "Book '{}' ({}) could not be read back ({e}), recreating it",
                book.name_any(),
                status.external_id
            );
            return create(book, ctx).await;
        }
    };

    // Keep status on the last successful read, so changes made behind our back show up as
    // drift on the next pass
    let seen = BookStatus::observed(&observed);
    if seen != status {
        debug!(
            "Book '{}' differs in the bookstore, refreshing status",
            book.name_any()
        );
        book.status = Some(seen);
        ctx.store.persist_status(&book, ctx.deadline()).await?;
    }

    Ok(Outcome::InSync)
}
