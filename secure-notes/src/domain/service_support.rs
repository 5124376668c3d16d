//! Internal helpers shared by the note, sharing, and identity services.

use serde_json::json;

use crate::domain::ports::{DocumentStoreError, IdentityBackendError};
use crate::domain::Error;

pub(crate) fn map_store_error(error: DocumentStoreError) -> Error {
    match error {
        DocumentStoreError::PermissionDenied { message } => Error::forbidden(message),
        DocumentStoreError::NotFound { path } => {
            Error::not_found(format!("no document at {path}")).with_details(json!({ "path": path }))
        }
        DocumentStoreError::Unavailable { message } => {
            Error::unavailable(format!("document store unavailable: {message}"))
        }
        DocumentStoreError::Aborted { message } => {
            Error::unavailable(format!("write batch aborted: {message}"))
        }
        DocumentStoreError::InvalidArgument { message } => Error::invalid_request(message),
    }
}

pub(crate) fn map_identity_error(error: IdentityBackendError) -> Error {
    let reason = match &error {
        IdentityBackendError::InvalidCredential { .. } => "invalid_credential",
        IdentityBackendError::PopupCancelled => "popup_cancelled",
        IdentityBackendError::Network { .. } => "network",
        IdentityBackendError::ProviderDisabled { .. } => "provider_disabled",
    };
    Error::auth_failed(error.to_string()).with_details(json!({ "reason": reason }))
}

pub(crate) fn map_decode_error(what: &str, error: impl std::fmt::Display) -> Error {
    Error::internal(format!("malformed {what}: {error}"))
}

pub(crate) fn map_encode_error(what: &str, error: serde_json::Error) -> Error {
    Error::internal(format!("failed to encode {what}: {error}"))
}
