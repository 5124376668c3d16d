//! Sharing index: access grants and each grantee's shared-with-me list.
//!
//! A grant lives at `notes/{noteId}/users/{uid}` and is mirrored by an index
//! entry at `users/{uid}/sharedNotes/{noteId}`. Both are written and removed
//! in a single [`WriteBatch`]; the only state where one exists without the
//! other is an index entry hidden by its grantee.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::future::join_all;
use mockable::Clock;
use serde_json::json;
use tracing::{debug, info};

use crate::domain::live::{LiveState, Snapshots, Subscription, follow_identity};
use crate::domain::ports::{DocumentStore, DocumentStoreError};
use crate::domain::service_support::{map_decode_error, map_encode_error, map_store_error};
use crate::domain::{
    AccessGrant, Document, Error, Namespace, Note, NoteId, Query, SharedNoteEntry, User, UserId,
    WriteBatch, update_timestamp,
};

/// Grant, revoke, and shared-with-me operations for one connected session.
#[derive(Clone)]
pub struct SharingIndex<S> {
    store: Arc<S>,
    namespace: Namespace,
    clock: Arc<dyn Clock>,
}

impl<S> SharingIndex<S> {
    /// Create a sharing index over `store`.
    pub fn new(store: Arc<S>, namespace: Namespace, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            namespace,
            clock,
        }
    }
}

fn note_missing(note_id: &NoteId) -> Error {
    Error::not_found(format!("note {note_id} does not exist"))
        .with_details(json!({ "noteId": note_id.as_ref() }))
}

async fn resolve_shared<S>(
    store: Arc<S>,
    snapshot: Result<Vec<Document>, DocumentStoreError>,
) -> Result<Vec<Note>, Error>
where
    S: DocumentStore + ?Sized,
{
    let entries = snapshot.map_err(map_store_error)?;
    let note_paths = entries.into_iter().filter_map(|document| {
        let id = document.id().to_owned();
        match SharedNoteEntry::from_document(document) {
            Ok(entry) => entry.note_path(),
            Err(err) => {
                debug!(entry = %id, error = %err, "skipping unreadable shared note entry");
                None
            }
        }
    });
    let reads = note_paths.map(|path| {
        let store = Arc::clone(&store);
        async move {
            let outcome = store.get(&path).await;
            (path, outcome)
        }
    });

    let mut notes = Vec::new();
    for (path, outcome) in join_all(reads).await {
        match outcome {
            Ok(Some(document)) => notes.push(
                Note::from_document(document).map_err(|err| map_decode_error("note", err))?,
            ),
            Ok(None) => debug!(%path, "skipping shared note that no longer exists"),
            Err(DocumentStoreError::PermissionDenied { .. }) => {
                debug!(%path, "skipping shared note that is no longer readable");
            }
            Err(err) => return Err(map_store_error(err)),
        }
    }
    Ok(notes)
}

fn live_shared<S>(store: Arc<S>, namespace: &Namespace, grantee: &UserId) -> Snapshots<Vec<Note>>
where
    S: DocumentStore + 'static,
{
    let query = Query::new(namespace.shared_notes(grantee));
    store
        .listen(query)
        .then(move |snapshot| resolve_shared(Arc::clone(&store), snapshot))
        .boxed()
}

impl<S> SharingIndex<S>
where
    S: DocumentStore + 'static,
{
    /// Give `grantee` access to `note_id` and add it to their shared list.
    ///
    /// Re-granting keeps the original `createdAt` and restores an index entry
    /// the grantee had hidden.
    pub async fn grant(
        &self,
        note_id: &NoteId,
        grantee: &UserId,
        read: bool,
    ) -> Result<AccessGrant, Error> {
        let note = self
            .store
            .get(&self.namespace.note(note_id))
            .await
            .map_err(map_store_error)?;
        if note.is_none() {
            return Err(note_missing(note_id));
        }

        let grant_path = self.namespace.grant(note_id, grantee);
        let existing = self
            .store
            .get(&grant_path)
            .await
            .map_err(map_store_error)?;
        let mut grant = match existing {
            Some(document) => AccessGrant::from_document(note_id.clone(), grantee.clone(), document)
                .map_err(|err| map_decode_error("access grant", err))?,
            None => AccessGrant::new(note_id.clone(), grantee.clone(), read),
        };
        grant.read = read;
        let grant = update_timestamp(grant, self.clock.as_ref());
        let entry = SharedNoteEntry::mirror(&grant, grant_path.clone());

        let mut batch = WriteBatch::new();
        batch
            .set(
                grant_path,
                grant
                    .to_fields()
                    .map_err(|err| map_encode_error("access grant", err))?,
            )
            .set(
                self.namespace.shared_note(grantee, note_id),
                entry
                    .to_fields()
                    .map_err(|err| map_encode_error("shared note entry", err))?,
            );
        self.store.commit(batch).await.map_err(map_store_error)?;
        info!(note_id = %note_id, grantee = %grantee, read, "access granted");
        Ok(grant)
    }

    /// Remove `grantee`'s grant on `note_id` together with their index entry.
    ///
    /// Owner only. Fails with `NotFound` when no grant is visible to the
    /// caller and `Forbidden` when the caller does not own the note.
    pub async fn revoke(&self, note_id: &NoteId, grantee: &UserId) -> Result<(), Error> {
        let grant_path = self.namespace.grant(note_id, grantee);
        let existing = self
            .store
            .get(&grant_path)
            .await
            .map_err(map_store_error)?;
        if existing.is_none() {
            return Err(Error::not_found(format!(
                "note {note_id} is not shared with {grantee}"
            ))
            .with_details(json!({ "path": grant_path.to_string() })));
        }

        let mut batch = WriteBatch::new();
        batch
            .delete(grant_path)
            .delete(self.namespace.shared_note(grantee, note_id));
        self.store.commit(batch).await.map_err(map_store_error)?;
        info!(note_id = %note_id, grantee = %grantee, "access revoked");
        Ok(())
    }

    /// Drop `note_id` from `grantee`'s shared list without touching the grant.
    ///
    /// Only the grantee may do this for their own list; anyone else, the note
    /// owner included, gets `Forbidden`. The owner ends access with
    /// [`Self::revoke`].
    pub async fn hide(&self, note_id: &NoteId, grantee: &UserId) -> Result<(), Error> {
        self.store
            .delete(&self.namespace.shared_note(grantee, note_id))
            .await
            .map_err(map_store_error)?;
        debug!(note_id = %note_id, grantee = %grantee, "shared note hidden");
        Ok(())
    }

    /// Point read of a grant.
    pub async fn fetch_grant(
        &self,
        note_id: &NoteId,
        grantee: &UserId,
    ) -> Result<Option<AccessGrant>, Error> {
        let document = self
            .store
            .get(&self.namespace.grant(note_id, grantee))
            .await
            .map_err(map_store_error)?;
        document
            .map(|document| {
                AccessGrant::from_document(note_id.clone(), grantee.clone(), document)
                    .map_err(|err| map_decode_error("access grant", err))
            })
            .transpose()
    }

    /// Live list of the notes shared with `grantee`.
    ///
    /// Each index snapshot is resolved into notes with one concurrent read
    /// per entry before anything is published. Entries whose note is gone or
    /// no longer readable are left out.
    pub fn subscribe_shared_with(&self, grantee: Option<&UserId>) -> Subscription<Vec<Note>> {
        match grantee {
            None => Subscription::settled(LiveState::loaded(Vec::new())),
            Some(grantee) => Subscription::from_snapshots(live_shared(
                Arc::clone(&self.store),
                &self.namespace,
                grantee,
            )),
        }
    }

    /// [`Self::subscribe_shared_with`] for whoever `identity` currently holds.
    pub fn follow_shared_with(
        &self,
        identity: &Subscription<Option<User>>,
    ) -> Subscription<Vec<Note>> {
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        follow_identity(identity.watch(), move |grantee| {
            live_shared(Arc::clone(&store), &namespace, grantee)
        })
    }
}
