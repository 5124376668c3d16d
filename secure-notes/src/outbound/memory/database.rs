//! Shared in-memory document database.
//!
//! One [`MemoryDatabase`] plays the server: it owns the documents, evaluates
//! the access policy for every caller, and pushes full result sets to live
//! listeners after each committed change. Sessions talk to it through
//! [`super::MemoryDocumentStore`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::ports::{DocumentStoreError, LiveQuery};
use crate::domain::{Document, DocumentPath, Fields, Namespace, Query, UserId, WriteOp};

use super::listener::{ListenerRegistration, ListenerStream};
use super::policy::{AccessPolicy, SecureNotesRules, WriteRequest};

type SnapshotSender = mpsc::UnboundedSender<Result<Vec<Document>, DocumentStoreError>>;

struct Listener {
    query: Query,
    last: Vec<Document>,
    sender: SnapshotSender,
}

#[derive(Debug, Default)]
struct Faults {
    abort_commit_after: Option<usize>,
    offline: bool,
    read_delay: Option<Duration>,
}

#[derive(Default)]
struct DatabaseState {
    documents: BTreeMap<DocumentPath, Fields>,
    listeners: BTreeMap<u64, Listener>,
    next_listener: u64,
    faults: Faults,
}

/// Server-side state shared by every connected session.
pub struct MemoryDatabase {
    namespace: Namespace,
    policy: Arc<dyn AccessPolicy>,
    state: Mutex<DatabaseState>,
}

fn run_query(documents: &BTreeMap<DocumentPath, Fields>, query: &Query) -> Vec<Document> {
    documents
        .iter()
        .filter(|(path, fields)| query.matches(path, fields))
        .map(|(path, fields)| Document {
            path: path.clone(),
            fields: fields.clone(),
        })
        .collect()
}

fn offline() -> DocumentStoreError {
    DocumentStoreError::unavailable("database is offline")
}

impl MemoryDatabase {
    /// Database enforcing [`SecureNotesRules`] under `namespace`.
    pub fn new(namespace: Namespace) -> Arc<Self> {
        let rules = SecureNotesRules::new(namespace.clone());
        Self::with_policy(namespace, Arc::new(rules))
    }

    /// Database enforcing a custom policy.
    pub fn with_policy(namespace: Namespace, policy: Arc<dyn AccessPolicy>) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            policy,
            state: Mutex::new(DatabaseState::default()),
        })
    }

    /// Namespace the rules are scoped to.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn lock(&self) -> MutexGuard<'_, DatabaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `fields` at `path` without consulting the rules.
    pub fn seed(&self, path: DocumentPath, fields: Fields) {
        let mut state = self.lock();
        state.documents.insert(path, fields);
        Self::publish(&mut state);
    }

    /// Remove `path` without consulting the rules.
    pub fn purge(&self, path: &DocumentPath) {
        let mut state = self.lock();
        if state.documents.remove(path).is_some() {
            Self::publish(&mut state);
        }
    }

    /// Stored fields at `path`, bypassing the rules.
    pub fn peek(&self, path: &DocumentPath) -> Option<Fields> {
        self.lock().documents.get(path).cloned()
    }

    /// Number of live listeners still attached.
    pub fn active_listeners(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Make the next commit fail after `applied` of its writes have been
    /// staged. The staged writes are discarded.
    pub fn abort_next_commit_after(&self, applied: usize) {
        self.lock().faults.abort_commit_after = Some(applied);
    }

    /// Reject every operation as unavailable while `offline` holds.
    pub fn set_offline(&self, offline: bool) {
        self.lock().faults.offline = offline;
    }

    /// Delay applied to point reads, to widen race windows in tests.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.lock().faults.read_delay = delay;
    }

    /// Fail every live listener with `message` and detach them.
    pub fn interrupt_listeners(&self, message: &str) {
        let mut state = self.lock();
        let listeners = std::mem::take(&mut state.listeners);
        warn!(count = listeners.len(), reason = message, "interrupting live listeners");
        for listener in listeners.into_values() {
            if listener
                .sender
                .send(Err(DocumentStoreError::unavailable(message)))
                .is_err()
            {
                debug!("listener already released");
            }
        }
    }

    pub(crate) fn read_delay(&self) -> Option<Duration> {
        self.lock().faults.read_delay
    }

    pub(crate) fn read(
        &self,
        caller: Option<&UserId>,
        path: &DocumentPath,
    ) -> Result<Option<Document>, DocumentStoreError> {
        let state = self.lock();
        if state.faults.offline {
            return Err(offline());
        }
        self.policy
            .check_read(caller, path, &state.documents)
            .map_err(|denial| DocumentStoreError::permission_denied(denial.to_string()))?;
        Ok(state.documents.get(path).map(|fields| Document {
            path: path.clone(),
            fields: fields.clone(),
        }))
    }

    pub(crate) fn merge(
        &self,
        caller: Option<&UserId>,
        path: &DocumentPath,
        fields: Fields,
    ) -> Result<(), DocumentStoreError> {
        let merged = {
            let state = self.lock();
            if state.faults.offline {
                return Err(offline());
            }
            let Some(existing) = state.documents.get(path) else {
                return Err(DocumentStoreError::not_found(path.to_string()));
            };
            let mut merged = existing.clone();
            merged.extend(fields);
            merged
        };
        self.commit(
            caller,
            vec![WriteOp::Set {
                path: path.clone(),
                fields: merged,
            }],
        )
    }

    pub(crate) fn commit(
        &self,
        caller: Option<&UserId>,
        ops: Vec<WriteOp>,
    ) -> Result<(), DocumentStoreError> {
        let mut state = self.lock();
        if state.faults.offline {
            return Err(offline());
        }

        for op in &ops {
            let (path, incoming) = match op {
                WriteOp::Set { path, fields } => (path, Some(fields)),
                WriteOp::Delete { path } => (path, None),
            };
            let request = WriteRequest {
                caller,
                path,
                existing: state.documents.get(path),
                incoming,
                batch: &ops,
            };
            if let Err(denial) = self.policy.check_write(&request, &state.documents) {
                debug!(%denial, caller = ?caller, "write rejected");
                return Err(DocumentStoreError::permission_denied(denial.to_string()));
            }
        }

        let total = ops.len();
        let abort_after = state.faults.abort_commit_after.take();
        let mut staged = state.documents.clone();
        for (applied, op) in ops.into_iter().enumerate() {
            if abort_after == Some(applied) {
                warn!(applied, total, "aborting commit after staged writes");
                return Err(DocumentStoreError::aborted(format!(
                    "commit failed after {applied} of {total} writes"
                )));
            }
            match op {
                WriteOp::Set { path, fields } => {
                    staged.insert(path, fields);
                }
                WriteOp::Delete { path } => {
                    staged.remove(&path);
                }
            }
        }
        state.documents = staged;
        Self::publish(&mut state);
        Ok(())
    }

    pub(crate) fn listen(self: &Arc<Self>, caller: Option<&UserId>, query: Query) -> LiveQuery {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();

        let refused = if state.faults.offline {
            Some(offline())
        } else {
            self.policy
                .check_query(caller, &query, &state.documents)
                .err()
                .map(|denial| DocumentStoreError::permission_denied(denial.to_string()))
        };
        if let Some(error) = refused {
            debug!(%error, collection = %query.collection, "listener refused");
            if sender.send(Err(error)).is_err() {
                debug!("listener dropped before refusal was delivered");
            }
            return ListenerStream::detached(receiver).boxed();
        }

        let snapshot = run_query(&state.documents, &query);
        if sender.send(Ok(snapshot.clone())).is_err() {
            debug!("listener dropped before its first snapshot");
        }
        let id = state.next_listener;
        state.next_listener += 1;
        debug!(listener = id, collection = %query.collection, "listener attached");
        state.listeners.insert(
            id,
            Listener {
                query,
                last: snapshot,
                sender,
            },
        );
        drop(state);

        ListenerStream::registered(receiver, ListenerRegistration::new(Arc::downgrade(self), id))
            .boxed()
    }

    pub(crate) fn release_listener(database: &Weak<Self>, id: u64) {
        let Some(database) = database.upgrade() else {
            return;
        };
        if database.lock().listeners.remove(&id).is_some() {
            debug!(listener = id, "listener released");
        }
    }

    fn publish(state: &mut DatabaseState) {
        let DatabaseState {
            documents,
            listeners,
            ..
        } = state;
        listeners.retain(|id, listener| {
            let snapshot = run_query(documents, &listener.query);
            if snapshot == listener.last {
                return !listener.sender.is_closed();
            }
            listener.last = snapshot.clone();
            let delivered = listener.sender.send(Ok(snapshot)).is_ok();
            if !delivered {
                debug!(listener = *id, "dropping listener with closed receiver");
            }
            delivered
        });
    }
}
