//! Port abstraction for the remote document database.
//!
//! The store is addressed by absolute [`DocumentPath`]s and enforces its own
//! access rules against the session it was connected with. Live queries are
//! plain streams: dropping the stream releases the server-side listener.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::{Document, DocumentPath, Fields, Query, WriteBatch};

use super::define_port_error;

define_port_error! {
    /// Errors raised by document store adapters.
    pub enum DocumentStoreError {
        /// The access rules rejected the read or write.
        PermissionDenied { message: String } => "permission denied: {message}",
        /// A partial update targeted a missing document.
        NotFound { path: String } => "no document at {path}",
        /// The backend could not be reached.
        Unavailable { message: String } => "document store unavailable: {message}",
        /// A batch was rolled back part way through.
        Aborted { message: String } => "batch aborted: {message}",
        /// The request itself was malformed.
        InvalidArgument { message: String } => "invalid document store request: {message}",
    }
}

/// Stream of full result sets for a live query.
///
/// Every item is the complete current result, not a delta. An `Err` item
/// reports a failed listener; adapters end the stream after it.
pub type LiveQuery = BoxStream<'static, Result<Vec<Document>, DocumentStoreError>>;

/// Port for reading and writing documents.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `Ok(None)` when nothing is stored at `path`.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, DocumentStoreError>;

    /// Replace the document at `path`.
    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), DocumentStoreError>;

    /// Merge `fields` into the existing document at `path`.
    ///
    /// Fails with [`DocumentStoreError::NotFound`] when the document is absent.
    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<(), DocumentStoreError>;

    /// Remove the document at `path`. Removing an absent document succeeds.
    async fn delete(&self, path: &DocumentPath) -> Result<(), DocumentStoreError>;

    /// Apply every mutation in `batch`, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), DocumentStoreError>;

    /// Subscribe to `query`. The first item arrives once the initial result
    /// set is known.
    fn listen(&self, query: Query) -> LiveQuery;
}
