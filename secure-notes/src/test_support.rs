//! Test utilities for the secure-notes crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`).
//! Only compiled for tests or with the `test-support` feature.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::ports::AuthSubject;
use crate::domain::{IdentityService, NoteStore, SharingIndex, UserId};
use crate::outbound::memory::{MemoryDatabase, MemoryDocumentStore, MemoryIdentityBackend};

/// Clock whose time only moves when told to.
#[derive(Debug)]
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    /// Clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    /// Move the clock forward by `delta`.
    ///
    /// # Panics
    /// When `delta` does not fit a [`TimeDelta`].
    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => panic!("failed to convert Duration to TimeDelta: {error}; delta={delta:?}"),
        };
        *self.lock_clock() += delta;
    }

    /// Move the clock forward by whole seconds.
    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    fn lock_clock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// One signed-in client of a shared [`MemoryDatabase`], with every service
/// wired to its session.
pub struct ClientSession {
    /// Subject this client signs in as.
    pub user_id: UserId,
    /// Identity backend owning the session.
    pub backend: Arc<MemoryIdentityBackend>,
    /// Identity service over [`Self::backend`].
    pub identity: IdentityService<MemoryIdentityBackend, MemoryDocumentStore>,
    /// Note operations as this client.
    pub notes: NoteStore<MemoryDocumentStore>,
    /// Sharing operations as this client.
    pub sharing: SharingIndex<MemoryDocumentStore>,
}

impl ClientSession {
    /// Connect to `database` already signed in as `user_id`.
    ///
    /// # Panics
    /// When `user_id` is not a valid user id.
    pub fn signed_in(database: &Arc<MemoryDatabase>, user_id: &str, clock: Arc<dyn Clock>) -> Self {
        let user_id = match UserId::new(user_id) {
            Ok(id) => id,
            Err(error) => panic!("invalid user id {user_id:?}: {error}"),
        };
        let backend = Arc::new(MemoryIdentityBackend::new());
        backend.restore_session(Some(AuthSubject {
            id: user_id.clone(),
            display_name: Some(user_id.to_string()),
        }));
        let store = Arc::new(MemoryDocumentStore::connect(
            Arc::clone(database),
            backend.as_ref(),
        ));
        let namespace = database.namespace().clone();
        Self {
            identity: IdentityService::new(
                Arc::clone(&backend),
                Arc::clone(&store),
                namespace.clone(),
                Arc::clone(&clock),
            ),
            notes: NoteStore::new(Arc::clone(&store), namespace.clone(), Arc::clone(&clock)),
            sharing: SharingIndex::new(store, namespace, clock),
            backend,
            user_id,
        }
    }
}
