//! Stream handed out for live queries.
//!
//! The stream owns a registration whose drop detaches the listener from the
//! database, so releasing a live query is just dropping its stream.

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::domain::Document;
use crate::domain::ports::DocumentStoreError;

use super::MemoryDatabase;

/// Detaches listener `id` from the database when dropped.
pub(crate) struct ListenerRegistration {
    database: Weak<MemoryDatabase>,
    id: u64,
}

impl ListenerRegistration {
    pub(crate) fn new(database: Weak<MemoryDatabase>, id: u64) -> Self {
        Self { database, id }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        MemoryDatabase::release_listener(&self.database, self.id);
    }
}

pub(crate) struct ListenerStream {
    receiver: mpsc::UnboundedReceiver<Result<Vec<Document>, DocumentStoreError>>,
    _registration: Option<ListenerRegistration>,
}

impl ListenerStream {
    /// Stream that was never attached, e.g. after a refused query.
    pub(crate) fn detached(
        receiver: mpsc::UnboundedReceiver<Result<Vec<Document>, DocumentStoreError>>,
    ) -> Self {
        Self {
            receiver,
            _registration: None,
        }
    }

    pub(crate) fn registered(
        receiver: mpsc::UnboundedReceiver<Result<Vec<Document>, DocumentStoreError>>,
        registration: ListenerRegistration,
    ) -> Self {
        Self {
            receiver,
            _registration: Some(registration),
        }
    }
}

impl Stream for ListenerStream {
    type Item = Result<Vec<Document>, DocumentStoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
