//! Current identity and session management.
//!
//! The identity backend's observation watch is the only source of truth for
//! who is signed in. Sign-in and sign-out resolve only after that watch has
//! caught up, so queries started afterwards run as the new caller.

use std::sync::Arc;

use mockable::Clock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::live::{LiveState, Subscription};
use crate::domain::ports::{AuthObservation, AuthSubject, DocumentStore, IdentityBackend};
use crate::domain::service_support::{
    map_decode_error, map_encode_error, map_identity_error, map_store_error,
};
use crate::domain::{Credential, Error, FederatedProvider, Namespace, User, update_timestamp};

/// Identity operations for one client session.
#[derive(Clone)]
pub struct IdentityService<B, S> {
    backend: Arc<B>,
    store: Arc<S>,
    namespace: Namespace,
    clock: Arc<dyn Clock>,
}

impl<B, S> IdentityService<B, S> {
    /// Create an identity service. `store` must be connected to `backend`'s
    /// session.
    pub fn new(backend: Arc<B>, store: Arc<S>, namespace: Namespace, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            store,
            namespace,
            clock,
        }
    }
}

fn fallback_user(subject: &AuthSubject) -> User {
    User::new(
        subject.id.clone(),
        subject.display_name.clone().unwrap_or_default(),
    )
}

async fn load_user<S>(store: &S, namespace: &Namespace, subject: &AuthSubject) -> User
where
    S: DocumentStore + ?Sized,
{
    match store.get(&namespace.user(&subject.id)).await {
        Ok(Some(document)) => User::from_fields(subject.id.clone(), document.fields)
            .unwrap_or_else(|err| {
                warn!(user_id = %subject.id, error = %err, "ignoring malformed user profile");
                fallback_user(subject)
            }),
        Ok(None) => fallback_user(subject),
        Err(err) => {
            debug!(user_id = %subject.id, error = %err, "user profile not readable yet");
            fallback_user(subject)
        }
    }
}

async fn observed_state<S>(
    store: &S,
    namespace: &Namespace,
    observation: AuthObservation,
) -> Option<LiveState<Option<User>>>
where
    S: DocumentStore + ?Sized,
{
    match observation {
        AuthObservation::Pending => None,
        AuthObservation::SignedOut => Some(LiveState::loaded(None)),
        AuthObservation::SignedIn(subject) => Some(LiveState::loaded(Some(
            load_user(store, namespace, &subject).await,
        ))),
        AuthObservation::Failed(err) => {
            Some(LiveState::failed(None, map_identity_error(err)))
        }
    }
}

async fn wait_for_session(
    session: &mut watch::Receiver<AuthObservation>,
    mut settled: impl FnMut(&AuthObservation) -> bool,
) -> Result<(), Error> {
    let observed = session.wait_for(|observation| settled(observation)).await.is_ok();
    if observed {
        Ok(())
    } else {
        Err(Error::unavailable("identity backend stopped reporting sessions"))
    }
}

impl<B, S> IdentityService<B, S>
where
    B: IdentityBackend + 'static,
    S: DocumentStore + 'static,
{
    /// Live view of the signed-in user.
    ///
    /// Not ready until the backend reports its first session state; from
    /// then on it stays ready and follows every sign-in and sign-out. A
    /// failing session watch publishes no user and the error.
    pub fn current_identity(&self) -> Subscription<Option<User>> {
        let session = self.backend.observe();
        let store = Arc::clone(&self.store);
        let namespace = self.namespace.clone();
        Subscription::spawn(LiveState::pending(None), move |sender| async move {
            let mut session = session;
            loop {
                let observation = session.borrow_and_update().clone();
                if let Some(state) = observed_state(store.as_ref(), &namespace, observation).await {
                    sender.send_if_modified(|current| {
                        if *current == state {
                            return false;
                        }
                        *current = state;
                        true
                    });
                }
                if session.changed().await.is_err() {
                    debug!("identity watch closed");
                    break;
                }
            }
        })
    }

    /// Sign in with `credential` and return the signed-in user.
    pub async fn sign_in_with_credential(&self, credential: Credential) -> Result<User, Error> {
        let subject = match &credential {
            Credential::EmailPassword(credentials) => {
                self.backend.sign_in_with_password(credentials).await
            }
        }
        .map_err(map_identity_error)?;
        self.finish_sign_in(subject).await
    }

    /// Sign in through `provider`'s popup and return the signed-in user.
    pub async fn sign_in_with_federated_provider(
        &self,
        provider: FederatedProvider,
    ) -> Result<User, Error> {
        let subject = self
            .backend
            .sign_in_with_provider(provider)
            .await
            .map_err(map_identity_error)?;
        self.finish_sign_in(subject).await
    }

    /// End the session once the backend has observed it ending.
    pub async fn sign_out(&self) -> Result<(), Error> {
        let mut session = self.backend.observe();
        self.backend.sign_out().await.map_err(map_identity_error)?;
        wait_for_session(&mut session, |observation| {
            matches!(observation, AuthObservation::SignedOut)
        })
        .await?;
        info!("signed out");
        Ok(())
    }

    async fn finish_sign_in(&self, subject: AuthSubject) -> Result<User, Error> {
        let mut session = self.backend.observe();
        wait_for_session(&mut session, |observation| {
            observation
                .subject()
                .is_some_and(|current| current.id == subject.id)
        })
        .await?;
        let user = self.ensure_profile(&subject).await?;
        info!(user_id = %subject.id, "signed in");
        Ok(user)
    }

    async fn ensure_profile(&self, subject: &AuthSubject) -> Result<User, Error> {
        let path = self.namespace.user(&subject.id);
        let stored = self.store.get(&path).await.map_err(map_store_error)?;
        if let Some(document) = stored {
            return User::from_fields(subject.id.clone(), document.fields)
                .map_err(|err| map_decode_error("user profile", err));
        }

        let user = update_timestamp(fallback_user(subject), self.clock.as_ref());
        let fields = user
            .to_fields()
            .map_err(|err| map_encode_error("user profile", err))?;
        self.store.set(&path, fields).await.map_err(map_store_error)?;
        info!(user_id = %subject.id, "user profile created");
        Ok(user)
    }
}
