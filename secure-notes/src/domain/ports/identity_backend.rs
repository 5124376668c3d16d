//! Port abstraction for the external identity provider.
//!
//! Sign-in calls return the authenticated subject, but session state is only
//! authoritative once it shows up on the [`IdentityBackend::observe`] watch.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{EmailCredentials, FederatedProvider, UserId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by identity backend adapters.
    pub enum IdentityBackendError {
        /// Email/password pair was rejected.
        InvalidCredential { message: String } => "invalid credential: {message}",
        /// The provider popup was dismissed before completing.
        PopupCancelled => "sign-in popup was closed before completing",
        /// The identity service could not be reached.
        Network { message: String } => "identity service unreachable: {message}",
        /// The provider is not enabled for this deployment.
        ProviderDisabled { provider: String } => "sign-in provider {provider} is not enabled",
    }
}

/// Subject authenticated by the identity backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSubject {
    /// Provider subject identifier.
    pub id: UserId,
    /// Display name offered by the provider, if any.
    pub display_name: Option<String>,
}

/// Session state as last reported by the identity backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthObservation {
    /// The backend has not yet restored or rejected a session.
    Pending,
    /// No session.
    SignedOut,
    /// Active session for the subject.
    SignedIn(AuthSubject),
    /// The session watch itself failed.
    Failed(IdentityBackendError),
}

impl AuthObservation {
    /// Subject of an active session.
    pub fn subject(&self) -> Option<&AuthSubject> {
        match self {
            Self::SignedIn(subject) => Some(subject),
            Self::Pending | Self::SignedOut | Self::Failed(_) => None,
        }
    }
}

/// Port for authenticating the current session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Authenticate with email and password.
    async fn sign_in_with_password(
        &self,
        credentials: &EmailCredentials,
    ) -> Result<AuthSubject, IdentityBackendError>;

    /// Authenticate through a federated provider popup.
    async fn sign_in_with_provider(
        &self,
        provider: FederatedProvider,
    ) -> Result<AuthSubject, IdentityBackendError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), IdentityBackendError>;

    /// Watch session transitions. The current value is the latest observation.
    fn observe(&self) -> watch::Receiver<AuthObservation>;
}
