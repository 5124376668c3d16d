//! Per-session client of the in-memory database.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::ports::{
    AuthObservation, DocumentStore, DocumentStoreError, IdentityBackend, LiveQuery,
};
use crate::domain::{Document, DocumentPath, Fields, Query, UserId, WriteBatch, WriteOp};

use super::MemoryDatabase;

/// [`DocumentStore`] bound to one identity backend's session.
///
/// Every request is evaluated against whoever that session holds at the time
/// the request is made.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    database: Arc<MemoryDatabase>,
    session: watch::Receiver<AuthObservation>,
}

impl MemoryDocumentStore {
    /// Connect as whoever `identity` is signed in as.
    pub fn connect(database: Arc<MemoryDatabase>, identity: &dyn IdentityBackend) -> Self {
        Self {
            database,
            session: identity.observe(),
        }
    }

    /// Connect without any session.
    pub fn anonymous(database: Arc<MemoryDatabase>) -> Self {
        let (_, session) = watch::channel(AuthObservation::SignedOut);
        Self { database, session }
    }

    /// Database this client talks to.
    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    fn caller(&self) -> Option<UserId> {
        self.session
            .borrow()
            .subject()
            .map(|subject| subject.id.clone())
    }

    async fn round_trip(&self) {
        if let Some(delay) = self.database.read_delay() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, DocumentStoreError> {
        self.round_trip().await;
        self.database.read(self.caller().as_ref(), path)
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), DocumentStoreError> {
        let ops = vec![WriteOp::Set {
            path: path.clone(),
            fields,
        }];
        self.database.commit(self.caller().as_ref(), ops)
    }

    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<(), DocumentStoreError> {
        self.database.merge(self.caller().as_ref(), path, fields)
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), DocumentStoreError> {
        let ops = vec![WriteOp::Delete { path: path.clone() }];
        self.database.commit(self.caller().as_ref(), ops)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), DocumentStoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.database.commit(self.caller().as_ref(), batch.into_ops())
    }

    fn listen(&self, query: Query) -> LiveQuery {
        self.database.listen(self.caller().as_ref(), query)
    }
}
