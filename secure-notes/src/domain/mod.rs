//! Domain primitives, services, and live subscriptions.
//!
//! Purpose: model notes, users, access grants, and the shared-with-me index
//! as strongly typed values, and expose the services that keep grants and
//! index entries consistent. Backends are reached only through [`ports`].
//!
//! Public surface:
//! - Error / ErrorCode: failure payload with a stable code.
//! - NoteStore, SharingIndex, IdentityService: per-session services.
//! - Subscription / LiveState: `(value, error, ready)` live results.
//! - SubscriptionCoordinator / combine: readiness across subscriptions.

pub mod access_grant;
pub mod auth;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod identity;
pub mod live;
pub mod note;
pub mod note_store;
pub mod ports;
pub mod record;
mod service_support;
pub mod sharing;
pub mod user;

pub use self::access_grant::{AccessGrant, SharedNoteEntry, SharedNoteEntryError};
pub use self::auth::{Credential, CredentialValidationError, EmailCredentials, FederatedProvider};
pub use self::coordinator::{CombinedStatus, SubscriptionCoordinator, combine};
pub use self::document::{
    CollectionLocation, CollectionPath, DEFAULT_ROOT_COLLECTION, DEFAULT_SCHEMA_VERSION, Document,
    DocumentPath, FieldFilter, Fields, Location, Namespace, PathError, Query, WriteBatch, WriteOp,
};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::identity::IdentityService;
pub use self::live::{LiveState, LiveStatus, Snapshots, Subscription, follow_identity};
pub use self::note::{Note, NoteDraft, NoteId, NoteValidationError};
pub use self::note_store::NoteStore;
pub use self::record::{Record, Timestamped, update_timestamp, zero_timestamp};
pub use self::sharing::SharingIndex;
pub use self::user::{User, UserId, UserValidationError};
