//! Secure notes sharing layer.
//!
//! Notes can be private, public, or shared with named users. Sharing is
//! recorded twice, as an access grant under the note and as an entry in the
//! grantee's shared-with-me index, and both are always written together.

pub mod config;
pub mod domain;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::SecureNotesSettings;
