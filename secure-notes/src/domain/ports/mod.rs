//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod document_store;
mod identity_backend;

#[cfg(test)]
pub use document_store::MockDocumentStore;
pub use document_store::{DocumentStore, DocumentStoreError, LiveQuery};
#[cfg(test)]
pub use identity_backend::MockIdentityBackend;
pub use identity_backend::{AuthObservation, AuthSubject, IdentityBackend, IdentityBackendError};
