//! Note persistence and live note queries.
//!
//! Writes go straight to the document store under the session it was
//! connected with; the store's access rules decide ownership. Live queries
//! are exposed as [`Subscription`]s so callers never see raw snapshots.

use std::sync::Arc;

use futures_util::StreamExt;
use mockable::Clock;
use serde_json::json;
use tracing::debug;

use crate::domain::live::{LiveState, Snapshots, Subscription, follow_identity};
use crate::domain::ports::DocumentStore;
use crate::domain::service_support::{map_decode_error, map_encode_error, map_store_error};
use crate::domain::{
    Document, Error, Namespace, Note, NoteDraft, NoteId, Query, User, UserId, update_timestamp,
};

/// Note operations for one connected session.
#[derive(Clone)]
pub struct NoteStore<S> {
    store: Arc<S>,
    namespace: Namespace,
    clock: Arc<dyn Clock>,
}

impl<S> NoteStore<S> {
    /// Create a note store over `store`.
    pub fn new(store: Arc<S>, namespace: Namespace, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            namespace,
            clock,
        }
    }

    /// Build an unpersisted note from `draft`. Performs no I/O.
    pub fn create(draft: NoteDraft) -> Note {
        Note::from_draft(draft)
    }
}

fn decode_notes(documents: Vec<Document>) -> Result<Vec<Note>, Error> {
    documents
        .into_iter()
        .map(|document| Note::from_document(document).map_err(|err| map_decode_error("note", err)))
        .collect()
}

fn owner_query(namespace: &Namespace, owner: &UserId) -> Query {
    Query::new(namespace.notes()).where_eq("userId", json!(owner.as_ref()))
}

fn live_notes<S: DocumentStore + ?Sized>(store: &S, query: Query) -> Snapshots<Vec<Note>> {
    store
        .listen(query)
        .map(|snapshot| snapshot.map_err(map_store_error).and_then(decode_notes))
        .boxed()
}

impl<S> NoteStore<S>
where
    S: DocumentStore + 'static,
{
    /// Live list of every public note.
    pub fn subscribe_public(&self) -> Subscription<Vec<Note>> {
        let query = Query::new(self.namespace.notes()).where_eq("public", json!(true));
        Subscription::from_snapshots(live_notes(self.store.as_ref(), query))
    }

    /// Live list of the notes owned by `owner`.
    ///
    /// Without an owner the subscription is ready and empty and no query is
    /// issued.
    pub fn subscribe_by_owner(&self, owner: Option<&UserId>) -> Subscription<Vec<Note>> {
        match owner {
            None => Subscription::settled(LiveState::loaded(Vec::new())),
            Some(owner) => Subscription::from_snapshots(live_notes(
                self.store.as_ref(),
                owner_query(&self.namespace, owner),
            )),
        }
    }

    /// [`Self::subscribe_by_owner`] for whoever `identity` currently holds.
    pub fn follow_owner(&self, identity: &Subscription<Option<User>>) -> Subscription<Vec<Note>> {
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        follow_identity(identity.watch(), move |owner| {
            live_notes(store.as_ref(), owner_query(&namespace, owner))
        })
    }

    /// Persist changes to an existing note and return the stamped copy.
    ///
    /// Only the stored fields are written. Fails with `NotFound` when the note
    /// does not exist and `Forbidden` when the caller does not own it.
    pub async fn save(&self, note: &Note) -> Result<Note, Error> {
        let id = note
            .id()
            .map_err(|err| Error::invalid_request(format!("cannot save an unsaved note: {err}")))?;
        let stamped = update_timestamp(note.clone(), self.clock.as_ref());
        let fields = stamped
            .to_fields()
            .map_err(|err| map_encode_error("note", err))?;
        self.store
            .update(&self.namespace.note(&id), fields)
            .await
            .map_err(map_store_error)?;
        debug!(note_id = %id, "note saved");
        Ok(stamped)
    }

    /// First persist of a note, assigning a random id when it has none.
    pub async fn insert(&self, note: Note) -> Result<Note, Error> {
        let mut note = note;
        if note.record.id.is_empty() {
            note.record.id = NoteId::random().to_string();
        }
        let id = note
            .id()
            .map_err(|err| Error::invalid_request(format!("invalid note id: {err}")))?;
        let stamped = update_timestamp(note, self.clock.as_ref());
        let fields = stamped
            .to_fields()
            .map_err(|err| map_encode_error("note", err))?;
        self.store
            .set(&self.namespace.note(&id), fields)
            .await
            .map_err(map_store_error)?;
        debug!(note_id = %id, "note inserted");
        Ok(stamped)
    }

    /// Point read of a note. `Ok(None)` when it does not exist.
    pub async fn fetch(&self, id: &NoteId) -> Result<Option<Note>, Error> {
        let document = self
            .store
            .get(&self.namespace.note(id))
            .await
            .map_err(map_store_error)?;
        document
            .map(|document| Note::from_document(document).map_err(|err| map_decode_error("note", err)))
            .transpose()
    }

    /// Delete a note. Grants on it are left in place.
    pub async fn delete(&self, id: &NoteId) -> Result<(), Error> {
        self.store
            .delete(&self.namespace.note(id))
            .await
            .map_err(map_store_error)?;
        debug!(note_id = %id, "note deleted");
        Ok(())
    }
}
