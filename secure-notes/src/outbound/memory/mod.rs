//! In-memory stand-ins for the hosted document database and identity
//! service.
//!
//! - **database**: shared server state, rule evaluation, live listeners, and
//!   fault injection
//! - **store**: per-session [`crate::domain::ports::DocumentStore`] client
//! - **identity**: [`crate::domain::ports::IdentityBackend`] with scripted
//!   accounts and providers

mod database;
mod identity;
mod listener;
pub mod policy;
mod store;

pub use database::MemoryDatabase;
pub use identity::{MemoryIdentityBackend, ProviderOutcome};
pub use policy::{AccessPolicy, Denial, DocumentView, SecureNotesRules, WriteRequest};
pub use store::MemoryDocumentStore;
