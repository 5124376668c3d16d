//! In-memory identity backend.
//!
//! Accounts and provider outcomes are registered up front; sign-in then
//! updates the session watch exactly as a hosted identity service would
//! after its own round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;
use zeroize::Zeroizing;

use crate::domain::ports::{AuthObservation, AuthSubject, IdentityBackend, IdentityBackendError};
use crate::domain::{EmailCredentials, FederatedProvider};

struct PasswordAccount {
    password: Zeroizing<String>,
    subject: AuthSubject,
}

/// What the popup for a federated provider will do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    /// The user completes sign-in as this subject.
    Account(AuthSubject),
    /// The user closes the popup.
    Cancelled,
}

/// Identity backend holding accounts in memory.
pub struct MemoryIdentityBackend {
    accounts: Mutex<HashMap<String, PasswordAccount>>,
    providers: Mutex<HashMap<FederatedProvider, ProviderOutcome>>,
    session: watch::Sender<AuthObservation>,
    offline: AtomicBool,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MemoryIdentityBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityBackend {
    /// Backend that has already observed an empty session.
    pub fn new() -> Self {
        Self::starting_with(AuthObservation::SignedOut)
    }

    /// Backend still restoring its session; see [`Self::restore_session`].
    pub fn unresolved() -> Self {
        Self::starting_with(AuthObservation::Pending)
    }

    fn starting_with(observation: AuthObservation) -> Self {
        let (session, _) = watch::channel(observation);
        Self {
            accounts: Mutex::default(),
            providers: Mutex::default(),
            session,
            offline: AtomicBool::new(false),
        }
    }

    /// Finish session restoration with `subject` (or none).
    pub fn restore_session(&self, subject: Option<AuthSubject>) {
        self.session.send_replace(
            subject.map_or(AuthObservation::SignedOut, AuthObservation::SignedIn),
        );
    }

    /// Report a failure of the session watch itself.
    pub fn fail_session(&self, error: IdentityBackendError) {
        self.session.send_replace(AuthObservation::Failed(error));
    }

    /// Register an email/password account.
    pub fn register_password(&self, email: &str, password: &str, subject: AuthSubject) {
        guard(&self.accounts).insert(
            email.trim().to_lowercase(),
            PasswordAccount {
                password: Zeroizing::new(password.to_owned()),
                subject,
            },
        );
    }

    /// Decide how the next popups for `provider` will end.
    pub fn script_provider(&self, provider: FederatedProvider, outcome: ProviderOutcome) {
        guard(&self.providers).insert(provider, outcome);
    }

    /// Fail sign-in attempts as unreachable while `offline` holds.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<(), IdentityBackendError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IdentityBackendError::network("identity service is offline"));
        }
        Ok(())
    }

    fn establish(&self, subject: AuthSubject) -> AuthSubject {
        debug!(user_id = %subject.id, "session established");
        self.session
            .send_replace(AuthObservation::SignedIn(subject.clone()));
        subject
    }
}

#[async_trait]
impl IdentityBackend for MemoryIdentityBackend {
    async fn sign_in_with_password(
        &self,
        credentials: &EmailCredentials,
    ) -> Result<AuthSubject, IdentityBackendError> {
        self.ensure_reachable()?;
        let subject = {
            let accounts = guard(&self.accounts);
            let Some(account) = accounts.get(credentials.email()) else {
                return Err(IdentityBackendError::invalid_credential(
                    "no account for this email",
                ));
            };
            if account.password.as_str() != credentials.password() {
                return Err(IdentityBackendError::invalid_credential("wrong password"));
            }
            account.subject.clone()
        };
        Ok(self.establish(subject))
    }

    async fn sign_in_with_provider(
        &self,
        provider: FederatedProvider,
    ) -> Result<AuthSubject, IdentityBackendError> {
        self.ensure_reachable()?;
        let outcome = guard(&self.providers).get(&provider).cloned();
        match outcome {
            Some(ProviderOutcome::Account(subject)) => Ok(self.establish(subject)),
            Some(ProviderOutcome::Cancelled) => Err(IdentityBackendError::popup_cancelled()),
            None => Err(IdentityBackendError::provider_disabled(provider.to_string())),
        }
    }

    async fn sign_out(&self) -> Result<(), IdentityBackendError> {
        self.session.send_replace(AuthObservation::SignedOut);
        Ok(())
    }

    fn observe(&self) -> watch::Receiver<AuthObservation> {
        self.session.subscribe()
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.
    use super::*;
    use crate::domain::UserId;
    use rstest::{fixture, rstest};

    fn subject(id: &str) -> AuthSubject {
        AuthSubject {
            id: UserId::new(id).expect("valid user id"),
            display_name: Some(id.to_owned()),
        }
    }

    #[fixture]
    fn backend() -> MemoryIdentityBackend {
        let backend = MemoryIdentityBackend::new();
        backend.register_password("alice@example.com", "s3cret", subject("alice"));
        backend
    }

    fn credentials(email: &str, password: &str) -> EmailCredentials {
        EmailCredentials::try_from_parts(email, password).expect("valid credentials")
    }

    #[rstest]
    #[tokio::test]
    async fn password_sign_in_publishes_session(backend: MemoryIdentityBackend) {
        let session = backend.observe();
        let signed_in = backend
            .sign_in_with_password(&credentials("Alice@Example.com", "s3cret"))
            .await
            .expect("sign in");
        assert_eq!(signed_in, subject("alice"));
        assert_eq!(*session.borrow(), AuthObservation::SignedIn(subject("alice")));
    }

    #[rstest]
    #[case("alice@example.com", "wrong")]
    #[case("nobody@example.com", "s3cret")]
    #[tokio::test]
    async fn bad_credentials_are_rejected(
        backend: MemoryIdentityBackend,
        #[case] email: &str,
        #[case] password: &str,
    ) {
        let err = backend
            .sign_in_with_password(&credentials(email, password))
            .await
            .expect_err("sign in must fail");
        assert!(matches!(err, IdentityBackendError::InvalidCredential { .. }));
        assert_eq!(*backend.observe().borrow(), AuthObservation::SignedOut);
    }

    #[rstest]
    #[tokio::test]
    async fn provider_outcomes_follow_the_script(backend: MemoryIdentityBackend) {
        backend.script_provider(FederatedProvider::GitHub, ProviderOutcome::Cancelled);
        backend.script_provider(
            FederatedProvider::Google,
            ProviderOutcome::Account(subject("gina")),
        );

        let cancelled = backend
            .sign_in_with_provider(FederatedProvider::GitHub)
            .await
            .expect_err("popup closed");
        assert_eq!(cancelled, IdentityBackendError::popup_cancelled());

        let signed_in = backend
            .sign_in_with_provider(FederatedProvider::Google)
            .await
            .expect("google sign in");
        assert_eq!(signed_in.id.as_ref(), "gina");
    }

    #[rstest]
    #[tokio::test]
    async fn offline_backend_reports_network_errors(backend: MemoryIdentityBackend) {
        backend.set_offline(true);
        let err = backend
            .sign_in_with_provider(FederatedProvider::Google)
            .await
            .expect_err("offline");
        assert!(matches!(err, IdentityBackendError::Network { .. }));
    }
}
