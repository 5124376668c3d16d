//! Access rules evaluated by the in-memory database.
//!
//! [`SecureNotesRules`] mirrors the server rules the note and sharing write
//! shapes are built for. Every individual read, query, and write is checked
//! against the caller and the state before the enclosing commit.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::domain::{
    CollectionLocation, DocumentPath, Fields, Location, Namespace, NoteId, Query, UserId, WriteOp,
};

/// Read-only access to stored documents while rules are evaluated.
pub trait DocumentView {
    /// Stored fields at `path`.
    fn lookup(&self, path: &DocumentPath) -> Option<&Fields>;
}

impl DocumentView for BTreeMap<DocumentPath, Fields> {
    fn lookup(&self, path: &DocumentPath) -> Option<&Fields> {
        self.get(path)
    }
}

/// Rejection produced by an [`AccessPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason} at {path}")]
pub struct Denial {
    /// Path or collection the request targeted.
    pub path: String,
    /// Why the rules rejected it.
    pub reason: &'static str,
}

impl Denial {
    fn at(path: impl ToString, reason: &'static str) -> Self {
        Self {
            path: path.to_string(),
            reason,
        }
    }
}

/// One mutation as seen by the rules.
#[derive(Debug)]
pub struct WriteRequest<'a> {
    /// Authenticated caller, if any.
    pub caller: Option<&'a UserId>,
    /// Target document.
    pub path: &'a DocumentPath,
    /// Stored fields before the commit.
    pub existing: Option<&'a Fields>,
    /// Fields after the write; `None` for a delete.
    pub incoming: Option<&'a Fields>,
    /// Every mutation in the enclosing commit.
    pub batch: &'a [WriteOp],
}

/// Server-side rules consulted for every operation.
pub trait AccessPolicy: Send + Sync {
    /// Point read of `path`.
    fn check_read(
        &self,
        caller: Option<&UserId>,
        path: &DocumentPath,
        view: &dyn DocumentView,
    ) -> Result<(), Denial>;

    /// Query over a collection.
    fn check_query(
        &self,
        caller: Option<&UserId>,
        query: &Query,
        view: &dyn DocumentView,
    ) -> Result<(), Denial>;

    /// Single mutation inside a commit.
    fn check_write(&self, request: &WriteRequest<'_>, view: &dyn DocumentView) -> Result<(), Denial>;
}

/// Rules for the notes, grants, profiles, and shared-note index.
#[derive(Debug, Clone)]
pub struct SecureNotesRules {
    namespace: Namespace,
}

fn is_caller(caller: Option<&UserId>, user: &UserId) -> bool {
    caller == Some(user)
}

fn owner_field(fields: &Fields) -> Option<&str> {
    fields.get("userId").and_then(Value::as_str)
}

fn allow_if(condition: bool, path: impl ToString, reason: &'static str) -> Result<(), Denial> {
    if condition {
        Ok(())
    } else {
        Err(Denial::at(path, reason))
    }
}

fn deletes(request: &WriteRequest<'_>, target: &DocumentPath) -> bool {
    request
        .batch
        .iter()
        .any(|op| matches!(op, WriteOp::Delete { path } if path == target))
}

impl SecureNotesRules {
    /// Rules scoped to documents under `namespace`.
    pub fn new(namespace: Namespace) -> Self {
        Self { namespace }
    }

    fn note_owner<'v>(&self, view: &'v dyn DocumentView, note: &NoteId) -> Option<&'v str> {
        view.lookup(&self.namespace.note(note)).and_then(owner_field)
    }

    fn is_owner(&self, view: &dyn DocumentView, note: &NoteId, caller: Option<&UserId>) -> bool {
        match (self.note_owner(view, note), caller) {
            (Some(owner), Some(caller)) => owner == caller.as_ref(),
            _ => false,
        }
    }

    fn holds_read_grant(&self, view: &dyn DocumentView, note: &NoteId, caller: Option<&UserId>) -> bool {
        caller.is_some_and(|grantee| {
            view.lookup(&self.namespace.grant(note, grantee))
                .and_then(|grant| grant.get("read"))
                .and_then(Value::as_bool)
                == Some(true)
        })
    }

    fn check_note_write(
        &self,
        request: &WriteRequest<'_>,
        caller: &UserId,
    ) -> Result<(), Denial> {
        let path = request.path;
        match (request.existing, request.incoming) {
            (None, Some(created)) => allow_if(
                owner_field(created) == Some(caller.as_ref()),
                path,
                "notes must be created with userId set to the caller",
            ),
            (Some(stored), Some(updated)) => {
                allow_if(
                    owner_field(stored) == Some(caller.as_ref()),
                    path,
                    "only the owner may update a note",
                )?;
                allow_if(
                    owner_field(updated) == owner_field(stored),
                    path,
                    "a note's userId cannot change",
                )
            }
            (Some(stored), None) => allow_if(
                owner_field(stored) == Some(caller.as_ref()),
                path,
                "only the owner may delete a note",
            ),
            (None, None) => Ok(()),
        }
    }

    fn check_grant_write(
        &self,
        request: &WriteRequest<'_>,
        view: &dyn DocumentView,
        note: &NoteId,
        grantee: &UserId,
    ) -> Result<(), Denial> {
        let path = request.path;
        let owner = self.is_owner(view, note, request.caller);
        match request.incoming {
            Some(fields) => {
                allow_if(owner, path, "only the note owner may grant access")?;
                allow_if(
                    fields.get("read").is_some_and(Value::is_boolean),
                    path,
                    "grants must carry a boolean read flag",
                )
            }
            None => {
                allow_if(owner, path, "only the note owner may revoke access")?;
                allow_if(
                    deletes(request, &self.namespace.shared_note(grantee, note)),
                    path,
                    "a grant is revoked together with its index entry",
                )
            }
        }
    }

    fn check_index_write(
        &self,
        request: &WriteRequest<'_>,
        view: &dyn DocumentView,
        grantee: &UserId,
        note: &NoteId,
    ) -> Result<(), Denial> {
        let path = request.path;
        let owner = self.is_owner(view, note, request.caller);
        match request.incoming {
            Some(fields) => {
                allow_if(owner, path, "only the note owner may share a note")?;
                let expected = json!(self.namespace.grant(note, grantee).to_string());
                allow_if(
                    fields.get("grant") == Some(&expected),
                    path,
                    "index entries must reference the matching grant",
                )
            }
            None => {
                if is_caller(request.caller, grantee) {
                    return Ok(());
                }
                allow_if(
                    owner && deletes(request, &self.namespace.grant(note, grantee)),
                    path,
                    "only the grantee may remove an index entry on its own",
                )
            }
        }
    }
}

impl AccessPolicy for SecureNotesRules {
    fn check_read(
        &self,
        caller: Option<&UserId>,
        path: &DocumentPath,
        view: &dyn DocumentView,
    ) -> Result<(), Denial> {
        match self.namespace.locate(path) {
            Location::User { uid } => {
                allow_if(is_caller(caller, &uid), path, "profiles are private")
            }
            Location::SharedNote { uid, .. } => allow_if(
                is_caller(caller, &uid),
                path,
                "shared-note indexes are private to their grantee",
            ),
            Location::Note { note } => {
                // Absent notes read as absent so callers can tell "gone" from
                // "hidden".
                let Some(fields) = view.lookup(path) else {
                    return Ok(());
                };
                let public = fields.get("public").and_then(Value::as_bool) == Some(true);
                let owned = caller.is_some_and(|id| owner_field(fields) == Some(id.as_ref()));
                allow_if(
                    public || owned || self.holds_read_grant(view, &note, caller),
                    path,
                    "note is not shared with the caller",
                )
            }
            Location::Grant { note, uid } => allow_if(
                is_caller(caller, &uid) || self.is_owner(view, &note, caller),
                path,
                "grants are visible to the grantee and the note owner",
            ),
            Location::Foreign => Err(Denial::at(path, "outside the secure-notes namespace")),
        }
    }

    fn check_query(
        &self,
        caller: Option<&UserId>,
        query: &Query,
        view: &dyn DocumentView,
    ) -> Result<(), Denial> {
        let collection = &query.collection;
        match self.namespace.locate_collection(collection) {
            CollectionLocation::Notes => {
                let public_only = query.has_filter("public", &json!(true));
                let own_only =
                    caller.is_some_and(|id| query.has_filter("userId", &json!(id.as_ref())));
                allow_if(
                    public_only || own_only,
                    collection,
                    "note queries must be limited to public notes or the caller's own",
                )
            }
            CollectionLocation::Grants { note } => allow_if(
                self.is_owner(view, &note, caller),
                collection,
                "only the note owner may list grants",
            ),
            CollectionLocation::SharedNotes { uid } => allow_if(
                is_caller(caller, &uid),
                collection,
                "shared-note indexes are private to their grantee",
            ),
            CollectionLocation::Foreign => {
                Err(Denial::at(collection, "outside the secure-notes namespace"))
            }
        }
    }

    fn check_write(&self, request: &WriteRequest<'_>, view: &dyn DocumentView) -> Result<(), Denial> {
        let Some(caller) = request.caller else {
            return Err(Denial::at(request.path, "writes require a signed-in caller"));
        };
        match self.namespace.locate(request.path) {
            Location::User { uid } => allow_if(
                &uid == caller,
                request.path,
                "profiles may only be written by their owner",
            ),
            Location::Note { .. } => self.check_note_write(request, caller),
            Location::Grant { note, uid } => self.check_grant_write(request, view, &note, &uid),
            Location::SharedNote { uid, note } => {
                self.check_index_write(request, view, &uid, &note)
            }
            Location::Foreign => Err(Denial::at(request.path, "outside the secure-notes namespace")),
        }
    }
}
