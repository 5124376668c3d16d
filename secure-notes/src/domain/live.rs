//! Live subscription state and the tasks that drive it.
//!
//! Every subscription publishes a `(value, error, ready)` triple through a
//! watch channel. One spawned task owns the only sender; dropping the
//! [`Subscription`] aborts that task, which in turn drops the backend listener
//! and any reads still in flight, so late results are never published.

use std::future::Future;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Error, User, UserId};

/// Stream of decoded results feeding a subscription.
pub type Snapshots<T> = BoxStream<'static, Result<T, Error>>;

/// Published state of a subscription.
///
/// `ready` is false until the first result (or failure) for the current
/// scope arrives. On failure `value` is reset to its empty form.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveState<T> {
    /// Latest value.
    pub value: T,
    /// Failure that produced the current state, if any.
    pub error: Option<Error>,
    /// Whether the current scope has produced a result.
    pub ready: bool,
}

impl<T> LiveState<T> {
    /// Not ready, no error.
    pub fn pending(value: T) -> Self {
        Self {
            value,
            error: None,
            ready: false,
        }
    }

    /// Ready with a value.
    pub fn loaded(value: T) -> Self {
        Self {
            value,
            error: None,
            ready: true,
        }
    }

    /// Ready with an error.
    pub fn failed(value: T, error: Error) -> Self {
        Self {
            value,
            error: Some(error),
            ready: true,
        }
    }

    /// Readiness and error without the value.
    pub fn status(&self) -> LiveStatus {
        LiveStatus {
            ready: self.ready,
            error: self.error.clone(),
        }
    }
}

/// Readiness and error of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveStatus {
    /// Whether the subscription has produced a result.
    pub ready: bool,
    /// Failure reported by the subscription, if any.
    pub error: Option<Error>,
}

/// Handle on a running subscription.
///
/// Dropping the handle, or calling [`Subscription::unsubscribe`], stops the
/// driving task and releases its backend listener.
#[derive(Debug)]
pub struct Subscription<T> {
    state: watch::Receiver<LiveState<T>>,
    driver: Option<JoinHandle<()>>,
}

impl<T> Subscription<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    /// Start `drive` with the sending half of a fresh state channel.
    ///
    /// Outside a Tokio runtime nothing can be driven, so the subscription
    /// settles immediately with an internal error.
    pub(crate) fn spawn<F, Fut>(initial: LiveState<T>, drive: F) -> Self
    where
        F: FnOnce(watch::Sender<LiveState<T>>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, state) = watch::channel(initial);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Self {
                state,
                driver: Some(runtime.spawn(drive(sender))),
            },
            Err(error) => {
                warn!(%error, "subscription created outside a Tokio runtime");
                sender.send_replace(LiveState::failed(
                    T::default(),
                    Error::internal("subscriptions require a Tokio runtime"),
                ));
                Self {
                    state,
                    driver: None,
                }
            }
        }
    }

    /// Subscription that never changes from `state`.
    pub fn settled(state: LiveState<T>) -> Self {
        let (_sender, receiver) = watch::channel(state);
        Self {
            state: receiver,
            driver: None,
        }
    }

    /// Publish every item of `snapshots`, starting not ready.
    pub fn from_snapshots(snapshots: Snapshots<T>) -> Self {
        Self::spawn(LiveState::pending(T::default()), |sender| async move {
            let mut snapshots = snapshots;
            while let Some(item) = snapshots.next().await {
                sender.send_replace(state_for(item));
            }
            debug!("live query ended");
        })
    }

    /// Latest published state.
    pub fn current(&self) -> LiveState<T> {
        self.state.borrow().clone()
    }

    /// Wait for the next published state.
    ///
    /// Returns `None` once the driver has stopped and nothing new can arrive.
    pub async fn changed(&mut self) -> Option<LiveState<T>> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Wait until the published state satisfies `predicate`, checking the
    /// current state first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&LiveState<T>) -> bool,
    ) -> Option<LiveState<T>> {
        self.state
            .wait_for(|state| predicate(state))
            .await
            .ok()
            .map(|state| LiveState::clone(&state))
    }

    /// Extra receiver on the state channel, for combinators and coordinators.
    pub fn watch(&self) -> watch::Receiver<LiveState<T>> {
        self.state.clone()
    }

    /// Stop the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

fn state_for<T: Default>(item: Result<T, Error>) -> LiveState<T> {
    match item {
        Ok(value) => LiveState::loaded(value),
        Err(error) => {
            warn!(code = ?error.code(), %error, "live query failed");
            LiveState::failed(T::default(), error)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Subject {
    Unresolved,
    Anonymous,
    Signed(UserId),
}

impl Subject {
    fn of(identity: &LiveState<Option<User>>) -> Self {
        if !identity.ready {
            return Self::Unresolved;
        }
        identity
            .value
            .as_ref()
            .map_or(Self::Anonymous, |user| Self::Signed(user.id().clone()))
    }

    fn placeholder<T: Default>(&self) -> LiveState<T> {
        match self {
            Self::Anonymous => LiveState::loaded(T::default()),
            Self::Unresolved | Self::Signed(_) => LiveState::pending(T::default()),
        }
    }
}

enum Event<T> {
    Identity { open: bool },
    Snapshot(Option<Result<T, Error>>),
}

async fn next_snapshot<T>(source: &mut Option<Snapshots<T>>) -> Option<Result<T, Error>> {
    match source {
        Some(snapshots) => snapshots.next().await,
        None => None,
    }
}

/// Scope a per-user query to whichever identity `identity` currently holds.
///
/// While the identity is unresolved the subscription is not ready. With no
/// signed-in user it settles on the empty value without querying. Whenever the
/// subject changes the current state resets to empty and not ready, the
/// previous query is dropped, and only then is `attach` called for the new
/// subject.
pub fn follow_identity<T, F>(
    identity: watch::Receiver<LiveState<Option<User>>>,
    attach: F,
) -> Subscription<T>
where
    T: Clone + Default + Send + Sync + 'static,
    F: FnMut(&UserId) -> Snapshots<T> + Send + 'static,
{
    let subject = Subject::of(&identity.borrow());
    Subscription::spawn(subject.placeholder(), move |sender| {
        drive_follower(identity, attach, sender, subject)
    })
}

async fn drive_follower<T, F>(
    mut identity: watch::Receiver<LiveState<Option<User>>>,
    mut attach: F,
    sender: watch::Sender<LiveState<T>>,
    mut subject: Subject,
) where
    T: Default + Send + Sync + 'static,
    F: FnMut(&UserId) -> Snapshots<T> + Send + 'static,
{
    let mut source = match &subject {
        Subject::Signed(user_id) => Some(attach(user_id)),
        Subject::Unresolved | Subject::Anonymous => None,
    };
    let mut identity_open = true;

    loop {
        let event = tokio::select! {
            changed = identity.changed(), if identity_open => Event::Identity {
                open: changed.is_ok(),
            },
            item = next_snapshot(&mut source), if source.is_some() => Event::Snapshot(item),
            else => break,
        };

        match event {
            Event::Identity { open: false } => identity_open = false,
            Event::Identity { open: true } => {
                let next = Subject::of(&identity.borrow_and_update());
                if next == subject {
                    continue;
                }
                source = None;
                sender.send_replace(next.placeholder());
                if let Subject::Signed(user_id) = &next {
                    debug!(user_id = %user_id, "attaching query for new identity");
                    source = Some(attach(user_id));
                }
                subject = next;
            }
            Event::Snapshot(Some(item)) => {
                sender.send_replace(state_for(item));
            }
            Event::Snapshot(None) => source = None,
        }
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.
    use super::*;
    use futures::channel::mpsc;
    use rstest::rstest;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::timeout;

    type Feed = mpsc::UnboundedSender<Result<Vec<u32>, Error>>;

    fn user(id: &str) -> Option<User> {
        Some(User::new(UserId::new(id).expect("valid id"), ""))
    }

    async fn settle<T>(
        subscription: &mut Subscription<T>,
        predicate: impl FnMut(&LiveState<T>) -> bool,
    ) -> LiveState<T>
    where
        T: Clone + Default + Send + Sync + 'static,
    {
        timeout(Duration::from_secs(5), subscription.wait_for(predicate))
            .await
            .expect("state should arrive in time")
            .expect("driver should still be running")
    }

    /// Attach function that records each subject and hands out a fresh feed.
    fn recording_attach() -> (
        Arc<Mutex<HashMap<String, Feed>>>,
        impl FnMut(&UserId) -> Snapshots<Vec<u32>> + Send + 'static,
    ) {
        let feeds: Arc<Mutex<HashMap<String, Feed>>> = Arc::default();
        let registry = Arc::clone(&feeds);
        let attach = move |user_id: &UserId| {
            let (sender, receiver) = mpsc::unbounded();
            registry
                .lock()
                .expect("feed registry")
                .insert(user_id.to_string(), sender);
            receiver.boxed()
        };
        (feeds, attach)
    }

    async fn attached(feeds: &Arc<Mutex<HashMap<String, Feed>>>, user_id: &str) -> Feed {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(sender) = feeds.lock().expect("feed registry").get(user_id).cloned() {
                    return sender;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("query attached for user")
    }

    #[rstest]
    #[tokio::test]
    async fn snapshots_publish_values_then_errors() {
        let (sender, receiver) = mpsc::unbounded();
        let mut subscription = Subscription::<Vec<u32>>::from_snapshots(receiver.boxed());
        assert_eq!(subscription.current(), LiveState::pending(vec![]));

        sender.unbounded_send(Ok(vec![1, 2])).expect("send snapshot");
        let state = settle(&mut subscription, |state| state.ready).await;
        assert_eq!(state, LiveState::loaded(vec![1, 2]));

        sender
            .unbounded_send(Err(Error::forbidden("denied")))
            .expect("send failure");
        let state = settle(&mut subscription, |state| state.error.is_some()).await;
        assert_eq!(state, LiveState::failed(vec![], Error::forbidden("denied")));
    }

    #[rstest]
    #[tokio::test]
    async fn anonymous_identity_settles_without_querying() {
        let (_identity, receiver) = watch::channel(LiveState::loaded(None));
        let (feeds, attach) = recording_attach();
        let subscription = follow_identity::<Vec<u32>, _>(receiver, attach);

        assert_eq!(subscription.current(), LiveState::loaded(vec![]));
        tokio::task::yield_now().await;
        assert!(feeds.lock().expect("feed registry").is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn unresolved_identity_is_not_ready() {
        let (_identity, receiver) = watch::channel(LiveState::pending(None));
        let (_feeds, attach) = recording_attach();
        let subscription = follow_identity::<Vec<u32>, _>(receiver, attach);
        assert_eq!(subscription.current(), LiveState::pending(vec![]));
    }

    #[rstest]
    #[tokio::test]
    async fn identity_change_drops_old_query_before_attaching_new_one() {
        let (identity, receiver) = watch::channel(LiveState::loaded(user("u1")));
        let (feeds, attach) = recording_attach();
        let mut subscription = follow_identity::<Vec<u32>, _>(receiver, attach);

        let first = attached(&feeds, "u1").await;
        first.unbounded_send(Ok(vec![1])).expect("send u1 snapshot");
        settle(&mut subscription, |state| state.value == vec![1]).await;

        identity.send_replace(LiveState::loaded(user("u2")));
        let reset = settle(&mut subscription, |state| !state.ready).await;
        assert_eq!(reset, LiveState::pending(vec![]));

        let second = attached(&feeds, "u2").await;
        assert!(first.is_closed(), "u1 listener must be released");

        second
            .unbounded_send(Ok(vec![2]))
            .expect("send u2 snapshot");
        let state = settle(&mut subscription, |state| state.ready).await;
        assert_eq!(state.value, vec![2]);
    }

    #[rstest]
    #[tokio::test]
    async fn signing_out_settles_on_empty() {
        let (identity, receiver) = watch::channel(LiveState::loaded(user("u1")));
        let (feeds, attach) = recording_attach();
        let mut subscription = follow_identity::<Vec<u32>, _>(receiver, attach);
        attached(&feeds, "u1")
            .await
            .unbounded_send(Ok(vec![7]))
            .expect("send snapshot");
        settle(&mut subscription, |state| state.value == vec![7]).await;

        identity.send_replace(LiveState::loaded(None));
        let state = settle(&mut subscription, |state| state.value.is_empty()).await;
        assert_eq!(state, LiveState::loaded(vec![]));
    }

    #[rstest]
    #[tokio::test]
    async fn dropping_the_subscription_releases_the_query() {
        let (_identity, receiver) = watch::channel(LiveState::loaded(user("u1")));
        let (feeds, attach) = recording_attach();
        let subscription = follow_identity::<Vec<u32>, _>(receiver, attach);
        let sender = attached(&feeds, "u1").await;

        subscription.unsubscribe();
        timeout(Duration::from_secs(5), async {
            while !sender.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener released after unsubscribe");
    }

    #[rstest]
    fn subscriptions_outside_a_runtime_fail_fast() {
        let (_sender, receiver) = mpsc::unbounded::<Result<Vec<u32>, Error>>();
        let subscription = Subscription::from_snapshots(receiver.boxed());
        let state = subscription.current();
        assert!(state.ready);
        assert_eq!(
            state.error.map(|error| error.code()),
            Some(crate::domain::ErrorCode::InternalError)
        );
    }
}
