//! Access grants and the grantee-side index entries that mirror them.
//!
//! A grant lives at `notes/{noteId}/users/{uid}` and an index entry at
//! `users/{uid}/sharedNotes/{noteId}`. The entry stores the grant's path so a
//! reader can walk from their own index back to the note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{Document, DocumentPath, Fields, decode_fields, encode_fields};
use super::note::NoteId;
use super::record::{Record, Timestamped};
use super::user::UserId;

/// Read permission held by `grantee` on `note_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    /// Shared note.
    pub note_id: NoteId,
    /// User receiving access.
    pub grantee: UserId,
    /// Whether the grantee may read the note.
    pub read: bool,
    /// Timestamps; `record.id` is the grantee id.
    pub record: Record,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GrantDocument {
    read: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccessGrant {
    /// Unpersisted grant.
    pub fn new(note_id: NoteId, grantee: UserId, read: bool) -> Self {
        let record = Record::with_id(grantee.as_ref());
        Self {
            note_id,
            grantee,
            read,
            record,
        }
    }

    /// Decode a stored grant.
    pub fn from_document(
        note_id: NoteId,
        grantee: UserId,
        document: Document,
    ) -> Result<Self, serde_json::Error> {
        let stored: GrantDocument = decode_fields(document.fields)?;
        Ok(Self {
            record: Record {
                id: grantee.as_ref().to_owned(),
                created_at: stored.created_at,
                updated_at: stored.updated_at,
            },
            note_id,
            grantee,
            read: stored.read,
        })
    }

    /// Encode the stored grant fields.
    pub fn to_fields(&self) -> Result<Fields, serde_json::Error> {
        encode_fields(&GrantDocument {
            read: self.read,
            created_at: self.record.created_at,
            updated_at: self.record.updated_at,
        })
    }
}

impl Timestamped for AccessGrant {
    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

/// Entry in a grantee's shared-with-me index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedNoteEntry {
    /// Path of the access grant this entry mirrors.
    pub grant: DocumentPath,
    /// Timestamps; `record.id` is the note id.
    pub record: Record,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SharedNoteDocument {
    grant: String,
    #[serde(default)]
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: DateTime<Utc>,
}

/// Errors decoding a [`SharedNoteEntry`].
#[derive(Debug, thiserror::Error)]
pub enum SharedNoteEntryError {
    /// Fields were missing or of the wrong type.
    #[error("malformed shared note entry: {0}")]
    Fields(#[from] serde_json::Error),
    /// The stored reference is not a grant path.
    #[error("shared note entry references {reference}, which is not an access grant")]
    Reference {
        /// Stored reference value.
        reference: String,
    },
}

impl SharedNoteEntry {
    /// Entry mirroring `grant`, which is stored at `grant_path`.
    pub fn mirror(grant: &AccessGrant, grant_path: DocumentPath) -> Self {
        Self {
            grant: grant_path,
            record: Record {
                id: grant.note_id.as_ref().to_owned(),
                created_at: grant.record.created_at,
                updated_at: grant.record.updated_at,
            },
        }
    }

    /// Decode a stored index entry.
    ///
    /// The `grant` reference is required: an entry without one cannot be
    /// resolved to a note.
    pub fn from_document(document: Document) -> Result<Self, SharedNoteEntryError> {
        let id = document.id().to_owned();
        let stored: SharedNoteDocument = decode_fields(document.fields)?;
        let grant =
            DocumentPath::parse(&stored.grant).map_err(|_| SharedNoteEntryError::Reference {
                reference: stored.grant.clone(),
            })?;
        if grant.parent().parent_document().is_none() {
            return Err(SharedNoteEntryError::Reference {
                reference: stored.grant,
            });
        }
        Ok(Self {
            grant,
            record: Record {
                id,
                created_at: stored.created_at,
                updated_at: stored.updated_at,
            },
        })
    }

    /// Encode the stored index entry fields.
    pub fn to_fields(&self) -> Result<Fields, serde_json::Error> {
        encode_fields(&SharedNoteDocument {
            grant: self.grant.to_string(),
            created_at: self.record.created_at,
            updated_at: self.record.updated_at,
        })
    }

    /// Path of the note the referenced grant belongs to.
    pub fn note_path(&self) -> Option<DocumentPath> {
        self.grant.parent().parent_document()
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.
    use super::*;
    use crate::domain::Namespace;
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn ids() -> (NoteId, UserId) {
        (
            NoteId::new("n1").expect("valid note id"),
            UserId::new("u2").expect("valid user id"),
        )
    }

    #[rstest]
    fn mirrored_entry_resolves_to_the_note(ids: (NoteId, UserId)) {
        let (note, user) = ids;
        let ns = Namespace::default();
        let grant = AccessGrant::new(note.clone(), user.clone(), true);
        let entry = SharedNoteEntry::mirror(&grant, ns.grant(&note, &user));

        let decoded = SharedNoteEntry::from_document(Document {
            path: ns.shared_note(&user, &note),
            fields: entry.to_fields().expect("encode entry"),
        })
        .expect("decode entry");

        assert_eq!(decoded.note_path(), Some(ns.note(&note)));
        assert_eq!(decoded.record.id, "n1");
    }

    #[rstest]
    #[case(json!({}))]
    #[case(json!({"grant": 3}))]
    #[case(json!({"grant": "secure-notes/v1/notes"}))]
    #[case(json!({"grant": "secure-notes/v1"}))]
    fn entries_without_a_usable_reference_fail(#[case] fields: serde_json::Value) {
        let serde_json::Value::Object(fields) = fields else {
            panic!("fixture must be an object");
        };
        let document = Document {
            path: DocumentPath::parse("secure-notes/v1/users/u2/sharedNotes/n1")
                .expect("valid path"),
            fields,
        };
        assert!(SharedNoteEntry::from_document(document).is_err());
    }

    #[rstest]
    fn grant_without_read_field_decodes_as_no_access(ids: (NoteId, UserId)) {
        let (note, user) = ids;
        let document = Document {
            path: Namespace::default().grant(&note, &user),
            fields: Fields::new(),
        };
        let grant = AccessGrant::from_document(note, user, document).expect("decode grant");
        assert!(!grant.read);
    }
}
