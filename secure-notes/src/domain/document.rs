//! Document addressing, payloads, queries, and write batches.
//!
//! Paths alternate collection and document segments, so a document path always
//! has an even number of segments and a collection path an odd number. All
//! persisted data for one deployment lives under a [`Namespace`]
//! (`{root_collection}/{schema_version}`).

use std::fmt;

use serde_json::{Map, Value};

use super::{NoteId, UserId};

/// Field map stored at a document path.
pub type Fields = Map<String, Value>;

/// Encode a serde struct as a document field map.
pub(crate) fn encode_fields<T: serde::Serialize>(value: &T) -> Result<Fields, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(serde::ser::Error::custom(format!(
            "documents must encode as objects, got {other}"
        ))),
    }
}

/// Decode a document field map into a serde struct.
pub(crate) fn decode_fields<T: serde::de::DeserializeOwned>(
    fields: Fields,
) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(fields))
}

/// Validation errors for path segments and parsed paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// A segment was empty once trimmed.
    EmptySegment,
    /// A segment contained the `/` separator.
    SeparatorInSegment,
    /// A document path had an odd number of segments.
    NotADocument {
        /// Raw path that failed to parse.
        path: String,
    },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySegment => write!(f, "path segments must not be empty"),
            Self::SeparatorInSegment => write!(f, "path segments must not contain '/'"),
            Self::NotADocument { path } => {
                write!(f, "{path} does not address a document")
            }
        }
    }
}

impl std::error::Error for PathError {}

/// Check a single path segment.
pub fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.trim().is_empty() {
        return Err(PathError::EmptySegment);
    }
    if segment.contains('/') {
        return Err(PathError::SeparatorInSegment);
    }
    Ok(())
}

/// Absolute path of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(Vec<String>);

impl DocumentPath {
    /// Parse a `/`-separated absolute path.
    ///
    /// # Examples
    /// ```
    /// use secure_notes::domain::DocumentPath;
    ///
    /// let path = DocumentPath::parse("secure-notes/v1/notes/n1").unwrap();
    /// assert_eq!(path.id(), "n1");
    /// assert!(DocumentPath::parse("secure-notes/v1/notes").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let segments: Vec<String> = raw.split('/').map(str::to_owned).collect();
        for segment in &segments {
            validate_segment(segment)?;
        }
        if segments.len() % 2 != 0 {
            return Err(PathError::NotADocument {
                path: raw.to_owned(),
            });
        }
        Ok(Self(segments))
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Final segment: the document id.
    pub fn id(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    /// Collection holding this document.
    pub fn parent(&self) -> CollectionPath {
        let mut segments = self.0.clone();
        segments.pop();
        CollectionPath(segments)
    }

    /// Subcollection nested under this document.
    pub fn collection(&self, name: &str) -> CollectionPath {
        let mut segments = self.0.clone();
        segments.push(name.to_owned());
        CollectionPath(segments)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Absolute path of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(Vec<String>);

impl CollectionPath {
    /// Document inside this collection.
    ///
    /// `id` is expected to be a validated identifier such as a
    /// [`NoteId`] or [`UserId`].
    pub fn doc(&self, id: &str) -> DocumentPath {
        let mut segments = self.0.clone();
        segments.push(id.to_owned());
        DocumentPath(segments)
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Document owning this collection, or `None` for a root collection.
    pub fn parent_document(&self) -> Option<DocumentPath> {
        if self.0.len() < 3 {
            return None;
        }
        let mut segments = self.0.clone();
        segments.pop();
        Some(DocumentPath(segments))
    }

    /// Whether `path` is a direct child of this collection.
    pub fn contains(&self, path: &DocumentPath) -> bool {
        path.parent() == *self
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Root collection and schema version every persisted path is nested under.
///
/// # Examples
/// ```
/// use secure_notes::domain::{Namespace, NoteId, UserId};
///
/// let ns = Namespace::default();
/// let note = NoteId::new("n1").unwrap();
/// let user = UserId::new("u2").unwrap();
/// assert_eq!(ns.grant(&note, &user).to_string(), "secure-notes/v1/notes/n1/users/u2");
/// assert_eq!(ns.shared_note(&user, &note).to_string(), "secure-notes/v1/users/u2/sharedNotes/n1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    root: DocumentPath,
}

/// Default root collection.
pub const DEFAULT_ROOT_COLLECTION: &str = "secure-notes";
/// Default schema version segment.
pub const DEFAULT_SCHEMA_VERSION: &str = "v1";

const USERS: &str = "users";
const NOTES: &str = "notes";
const SHARED_NOTES: &str = "sharedNotes";

impl Namespace {
    /// Build a namespace from its two segments.
    pub fn new(root_collection: &str, schema_version: &str) -> Result<Self, PathError> {
        validate_segment(root_collection)?;
        validate_segment(schema_version)?;
        Ok(Self {
            root: DocumentPath(vec![root_collection.to_owned(), schema_version.to_owned()]),
        })
    }

    /// The `{root_collection}/{schema_version}` document.
    pub fn root(&self) -> &DocumentPath {
        &self.root
    }

    /// `users`
    pub fn users(&self) -> CollectionPath {
        self.root.collection(USERS)
    }

    /// `users/{uid}`
    pub fn user(&self, user: &UserId) -> DocumentPath {
        self.users().doc(user.as_ref())
    }

    /// `notes`
    pub fn notes(&self) -> CollectionPath {
        self.root.collection(NOTES)
    }

    /// `notes/{noteId}`
    pub fn note(&self, note: &NoteId) -> DocumentPath {
        self.notes().doc(note.as_ref())
    }

    /// `notes/{noteId}/users`
    pub fn grants(&self, note: &NoteId) -> CollectionPath {
        self.note(note).collection(USERS)
    }

    /// `notes/{noteId}/users/{uid}`
    pub fn grant(&self, note: &NoteId, grantee: &UserId) -> DocumentPath {
        self.grants(note).doc(grantee.as_ref())
    }

    /// `users/{uid}/sharedNotes`
    pub fn shared_notes(&self, user: &UserId) -> CollectionPath {
        self.user(user).collection(SHARED_NOTES)
    }

    /// `users/{uid}/sharedNotes/{noteId}`
    pub fn shared_note(&self, user: &UserId, note: &NoteId) -> DocumentPath {
        self.shared_notes(user).doc(note.as_ref())
    }

    /// Classify `path` relative to this namespace.
    pub fn locate(&self, path: &DocumentPath) -> Location {
        let Some(relative) = path.segments().strip_prefix(self.root.segments()) else {
            return Location::Foreign;
        };
        let located = match relative {
            [users, uid] if users == USERS => UserId::new(uid).ok().map(|id| Location::User { uid: id }),
            [users, uid, shared, note] if users == USERS && shared == SHARED_NOTES => {
                UserId::new(uid).ok().zip(NoteId::new(note).ok()).map(|(grantee, indexed)| {
                    Location::SharedNote {
                        uid: grantee,
                        note: indexed,
                    }
                })
            }
            [notes, note] if notes == NOTES => NoteId::new(note).ok().map(|id| Location::Note { note: id }),
            [notes, note, users, uid] if notes == NOTES && users == USERS => NoteId::new(note)
                .ok()
                .zip(UserId::new(uid).ok())
                .map(|(shared, grantee)| Location::Grant {
                    note: shared,
                    uid: grantee,
                }),
            _ => None,
        };
        located.unwrap_or(Location::Foreign)
    }

    /// Classify a collection relative to this namespace.
    pub fn locate_collection(&self, collection: &CollectionPath) -> CollectionLocation {
        let Some(relative) = collection.segments().strip_prefix(self.root.segments()) else {
            return CollectionLocation::Foreign;
        };
        let located = match relative {
            [notes] if notes == NOTES => Some(CollectionLocation::Notes),
            [notes, note, users] if notes == NOTES && users == USERS => {
                NoteId::new(note).ok().map(|id| CollectionLocation::Grants { note: id })
            }
            [users, uid, shared] if users == USERS && shared == SHARED_NOTES => {
                UserId::new(uid).ok().map(|id| CollectionLocation::SharedNotes { uid: id })
            }
            _ => None,
        };
        located.unwrap_or(CollectionLocation::Foreign)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            root: DocumentPath(vec![
                DEFAULT_ROOT_COLLECTION.to_owned(),
                DEFAULT_SCHEMA_VERSION.to_owned(),
            ]),
        }
    }
}

/// What a document path addresses inside a [`Namespace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// `users/{uid}`
    User {
        /// Owner of the profile.
        uid: UserId,
    },
    /// `users/{uid}/sharedNotes/{note}`
    SharedNote {
        /// Grantee owning the index.
        uid: UserId,
        /// Shared note.
        note: NoteId,
    },
    /// `notes/{note}`
    Note {
        /// Note id.
        note: NoteId,
    },
    /// `notes/{note}/users/{uid}`
    Grant {
        /// Shared note.
        note: NoteId,
        /// Grantee.
        uid: UserId,
    },
    /// Anything else.
    Foreign,
}

/// What a collection path addresses inside a [`Namespace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionLocation {
    /// `notes`
    Notes,
    /// `notes/{note}/users`
    Grants {
        /// Shared note.
        note: NoteId,
    },
    /// `users/{uid}/sharedNotes`
    SharedNotes {
        /// Grantee owning the index.
        uid: UserId,
    },
    /// Anything else.
    Foreign,
}

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Where the document lives.
    pub path: DocumentPath,
    /// Stored fields.
    pub fields: Fields,
}

impl Document {
    /// Final path segment.
    pub fn id(&self) -> &str {
        self.path.id()
    }
}

/// Equality filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    /// Field name.
    pub field: String,
    /// Value the field must equal.
    pub value: Value,
}

/// Live or one-shot query over a single collection.
///
/// # Examples
/// ```
/// use secure_notes::domain::{Namespace, Query};
/// use serde_json::json;
///
/// let query = Query::new(Namespace::default().notes()).where_eq("public", json!(true));
/// assert!(query.has_filter("public", &json!(true)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Collection being queried.
    pub collection: CollectionPath,
    /// Conjunctive equality filters.
    pub filters: Vec<FieldFilter>,
}

impl Query {
    /// Unfiltered query over `collection`.
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
        }
    }

    /// Add an equality filter.
    #[must_use]
    pub fn where_eq(mut self, field: &str, value: Value) -> Self {
        self.filters.push(FieldFilter {
            field: field.to_owned(),
            value,
        });
        self
    }

    /// Whether the query constrains `field` to exactly `value`.
    pub fn has_filter(&self, field: &str, value: &Value) -> bool {
        self.filters
            .iter()
            .any(|filter| filter.field == field && filter.value == *value)
    }

    /// Whether `path`/`fields` belong in this query's result set.
    pub fn matches(&self, path: &DocumentPath, fields: &Fields) -> bool {
        self.collection.contains(path)
            && self
                .filters
                .iter()
                .all(|filter| fields.get(&filter.field) == Some(&filter.value))
    }
}

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the document at `path` with `fields`.
    Set {
        /// Target document.
        path: DocumentPath,
        /// Full replacement contents.
        fields: Fields,
    },
    /// Remove the document at `path`; absent documents are a no-op.
    Delete {
        /// Target document.
        path: DocumentPath,
    },
}

impl WriteOp {
    /// Target document of the mutation.
    pub fn path(&self) -> &DocumentPath {
        match self {
            Self::Set { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// Ordered set of mutations committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full-document set.
    pub fn set(&mut self, path: DocumentPath, fields: Fields) -> &mut Self {
        self.ops.push(WriteOp::Set { path, fields });
        self
    }

    /// Queue a delete.
    pub fn delete(&mut self, path: DocumentPath) -> &mut Self {
        self.ops.push(WriteOp::Delete { path });
        self
    }

    /// Queued mutations in order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consume the batch.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Number of queued mutations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
