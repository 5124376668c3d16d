//! Note data model and its stored document shape.
//!
//! A note is private unless `public` is set or an access grant names another
//! user. The owner (`userId`) is fixed at creation. Decoding tolerates missing
//! fields, which default to zero values, but rejects fields of the wrong JSON
//! type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::document::{Document, Fields, PathError, decode_fields, encode_fields, validate_segment};
use super::record::{Record, Timestamped};
use super::user::UserId;

/// Validation errors returned by [`NoteId::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteValidationError {
    /// The id was empty once trimmed.
    EmptyId,
    /// The id contained a path separator.
    InvalidId,
}

impl fmt::Display for NoteValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "note id must not be empty"),
            Self::InvalidId => write!(f, "note id must not contain '/'"),
        }
    }
}

impl std::error::Error for NoteValidationError {}

impl From<PathError> for NoteValidationError {
    fn from(value: PathError) -> Self {
        match value {
            PathError::EmptySegment => Self::EmptyId,
            PathError::SeparatorInSegment | PathError::NotADocument { .. } => Self::InvalidId,
        }
    }
}

/// Identifier of a stored note.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteId(String);

impl NoteId {
    /// Validate and construct a [`NoteId`] from borrowed input.
    pub fn new(id: impl AsRef<str>) -> Result<Self, NoteValidationError> {
        Self::from_owned(id.as_ref().to_owned())
    }

    /// Generate a new random [`NoteId`].
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    fn from_owned(id: String) -> Result<Self, NoteValidationError> {
        validate_segment(&id)?;
        Ok(Self(id))
    }
}

impl AsRef<str> for NoteId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<NoteId> for String {
    fn from(value: NoteId) -> Self {
        value.0
    }
}

impl TryFrom<String> for NoteId {
    type Error = NoteValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_owned(value)
    }
}

/// Caller-supplied content for a new note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteDraft {
    /// Title text.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Whether anyone may read the note.
    pub public: bool,
    /// Intended owner; must be the caller when the note is inserted.
    pub owner: Option<UserId>,
}

/// A note as held in memory.
///
/// ## Invariants
/// - `record.id` is blank until the note is inserted.
/// - `owner` never changes once persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Note {
    /// Identity and timestamps.
    pub record: Record,
    /// Title text.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Whether anyone may read the note.
    pub public: bool,
    /// Owner (`userId`); `None` when absent from the stored document.
    pub owner: Option<UserId>,
}

/// Stored fields of `notes/{noteId}`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NoteDocument {
    title: String,
    body: String,
    public: bool,
    #[serde(serialize_with = "owner_to_string", deserialize_with = "owner_from_string")]
    user_id: Option<UserId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn owner_to_string<S: Serializer>(owner: &Option<UserId>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(owner.as_ref().map_or("", AsRef::as_ref))
}

fn owner_from_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<UserId>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if raw.is_empty() {
        return Ok(None);
    }
    UserId::new(raw).map(Some).map_err(serde::de::Error::custom)
}

impl Note {
    /// Build an unpersisted note: blank id, zero timestamps.
    pub fn from_draft(draft: NoteDraft) -> Self {
        let NoteDraft {
            title,
            body,
            public,
            owner,
        } = draft;
        Self {
            record: Record::default(),
            title,
            body,
            public,
            owner,
        }
    }

    /// Validated id, or an error while the id is still blank.
    pub fn id(&self) -> Result<NoteId, NoteValidationError> {
        NoteId::new(&self.record.id)
    }

    /// Decode a stored note; the id comes from the document path.
    pub fn from_document(document: Document) -> Result<Self, serde_json::Error> {
        let id = document.id().to_owned();
        let stored: NoteDocument = decode_fields(document.fields)?;
        Ok(Self {
            record: Record {
                id,
                created_at: stored.created_at,
                updated_at: stored.updated_at,
            },
            title: stored.title,
            body: stored.body,
            public: stored.public,
            owner: stored.user_id,
        })
    }

    /// Encode exactly the stored fields: title, body, public, userId,
    /// createdAt, updatedAt.
    pub fn to_fields(&self) -> Result<Fields, serde_json::Error> {
        encode_fields(&NoteDocument {
            title: self.title.clone(),
            body: self.body.clone(),
            public: self.public,
            user_id: self.owner.clone(),
            created_at: self.record.created_at,
            updated_at: self.record.updated_at,
        })
    }
}

impl Timestamped for Note {
    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.
    use super::*;
    use crate::domain::{Namespace, update_timestamp};
    use crate::test_support::MutableClock;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    fn document(fields: serde_json::Value) -> Document {
        let serde_json::Value::Object(fields) = fields else {
            panic!("fixture must be an object");
        };
        Document {
            path: Namespace::default().notes().doc("n1"),
            fields,
        }
    }

    #[rstest]
    fn from_draft_starts_unpersisted() {
        let note = Note::from_draft(NoteDraft {
            title: "t".into(),
            ..NoteDraft::default()
        });
        assert_eq!(note.record.id, "");
        assert!(!note.record.is_persisted());
        assert!(note.id().is_err());
    }

    #[rstest]
    fn missing_fields_decode_as_zero_values() {
        let note = Note::from_document(document(json!({"title": "only a title"})))
            .expect("partial documents decode");
        assert_eq!(note.record.id, "n1");
        assert_eq!(note.title, "only a title");
        assert_eq!(note.body, "");
        assert!(!note.public);
        assert_eq!(note.owner, None);
        assert!(!note.record.is_persisted());
    }

    #[rstest]
    #[case(json!({"public": "yes"}))]
    #[case(json!({"title": 7}))]
    #[case(json!({"userId": "a/b"}))]
    #[case(json!({"createdAt": "yesterday"}))]
    fn wrongly_typed_fields_fail(#[case] fields: serde_json::Value) {
        assert!(Note::from_document(document(fields)).is_err());
    }

    #[rstest]
    fn unknown_fields_are_ignored() {
        let note = Note::from_document(document(json!({"id": "legacy", "body": "b"})))
            .expect("extra fields are tolerated");
        assert_eq!(note.record.id, "n1");
        assert_eq!(note.body, "b");
    }

    #[rstest]
    fn stored_fields_survive_a_round_trip_with_exact_timestamps() {
        let clock = MutableClock::new(
            Utc.with_ymd_and_hms(2026, 5, 2, 8, 30, 0).single().expect("valid time")
                + chrono::TimeDelta::microseconds(123_456),
        );
        let mut note = update_timestamp(
            Note::from_draft(NoteDraft {
                title: "Groceries".into(),
                body: "milk".into(),
                public: true,
                owner: Some(UserId::new("u1").expect("valid id")),
            }),
            &clock,
        );
        note.record.id = "n1".into();

        let fields = note.to_fields().expect("encode note");
        let mut keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["body", "createdAt", "public", "title", "updatedAt", "userId"]
        );

        let decoded = Note::from_document(Document {
            path: Namespace::default().notes().doc("n1"),
            fields,
        })
        .expect("decode note");
        assert_eq!(decoded, note);
    }
}
