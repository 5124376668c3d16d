//! User data model.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::document::{Fields, PathError, decode_fields, encode_fields, validate_segment};
use super::record::{Record, Timestamped};

/// Validation errors returned by [`UserId::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserValidationError {
    /// The id was empty once trimmed.
    EmptyId,
    /// The id contained a path separator.
    InvalidId,
}

impl fmt::Display for UserValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "user id must not be empty"),
            Self::InvalidId => write!(f, "user id must not contain '/'"),
        }
    }
}

impl std::error::Error for UserValidationError {}

impl From<PathError> for UserValidationError {
    fn from(value: PathError) -> Self {
        match value {
            PathError::EmptySegment => Self::EmptyId,
            PathError::SeparatorInSegment | PathError::NotADocument { .. } => Self::InvalidId,
        }
    }
}

/// Identity-provider subject identifier.
///
/// The provider owns the format, so the only constraints are the ones that
/// keep the id usable as a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and construct a [`UserId`] from borrowed input.
    pub fn new(id: impl AsRef<str>) -> Result<Self, UserValidationError> {
        Self::from_owned(id.as_ref().to_owned())
    }

    fn from_owned(id: String) -> Result<Self, UserValidationError> {
        validate_segment(&id)?;
        Ok(Self(id))
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl TryFrom<String> for UserId {
    type Error = UserValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_owned(value)
    }
}

/// Application user stored at `users/{id}`.
///
/// ## Invariants
/// - `record.id` equals `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: UserId,
    name: String,
    record: Record,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserDocument {
    name: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl User {
    /// Unpersisted user.
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        let record = Record::with_id(id.as_ref());
        Self {
            id,
            name: name.into(),
            record,
        }
    }

    /// Subject identifier.
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// Display name; may be blank when the provider offers none.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Decode the stored `users/{id}` document.
    pub fn from_fields(id: UserId, fields: Fields) -> Result<Self, serde_json::Error> {
        let stored: UserDocument = decode_fields(fields)?;
        Ok(Self {
            record: Record {
                id: id.as_ref().to_owned(),
                created_at: stored.created_at,
                updated_at: stored.updated_at,
            },
            id,
            name: stored.name,
        })
    }

    /// Encode the fields stored at `users/{id}`.
    pub fn to_fields(&self) -> Result<Fields, serde_json::Error> {
        let stored = UserDocument {
            name: self.name.clone(),
            created_at: self.record.created_at,
            updated_at: self.record.updated_at,
        };
        encode_fields(&stored)
    }
}

impl Timestamped for User {
    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}
