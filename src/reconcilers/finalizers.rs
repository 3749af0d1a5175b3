//! In-memory bookkeeping of finalizer tokens.
//!
//! These helpers only touch `metadata.finalizers`; callers persist the object when a helper
//! reports a change.
use kube::ResourceExt;

/// Token guarding books whose bookstore record may still exist
pub const BOOK_FINALIZER: &str = "books.finalizer.bookstore.com";

pub fn contains<K: ResourceExt>(obj: &K, token: &str) -> bool {
    obj.finalizers().iter().any(|f| f == token)
}

/// Append `token` unless present. Returns whether the object changed.
pub fn ensure_present<K: ResourceExt>(obj: &mut K, token: &str) -> bool {
    if contains(obj, token) {
        return false;
    }

    obj.finalizers_mut().push(token.to_string());
    true
}

/// Drop every occurrence of `token`, keeping the order of the others. Returns whether the
/// object changed.
pub fn remove<K: ResourceExt>(obj: &mut K, token: &str) -> bool {
    if !contains(obj, token) {
        return false;
    }

    obj.finalizers_mut().retain(|f| f != token);
    true
}
