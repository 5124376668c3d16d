//! Readiness and error composition across several subscriptions.
//!
//! The combined state is loading while any input is still loading, even when
//! another input has already failed. Once every input is ready the first
//! error in registration order wins.

use futures_util::future::{BoxFuture, select_all};
use tokio::sync::watch;

use super::live::{LiveState, LiveStatus, Subscription};
use super::Error;

/// Combined status of a group of subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedStatus {
    /// At least one input has not produced a result yet.
    Loading,
    /// Every input is ready and at least one failed.
    Failed(Error),
    /// Every input is ready without error.
    Ready,
}

/// Combine statuses listed in registration order.
///
/// # Examples
/// ```
/// use secure_notes::domain::{CombinedStatus, Error, LiveStatus, combine};
///
/// let failed = LiveStatus { ready: true, error: Some(Error::forbidden("no")) };
/// let loading = LiveStatus { ready: false, error: None };
/// assert_eq!(combine([failed.clone(), loading]), CombinedStatus::Loading);
/// assert_eq!(combine([failed]), CombinedStatus::Failed(Error::forbidden("no")));
/// ```
pub fn combine(statuses: impl IntoIterator<Item = LiveStatus>) -> CombinedStatus {
    let mut first_error = None;
    for status in statuses {
        if !status.ready {
            return CombinedStatus::Loading;
        }
        if first_error.is_none() {
            first_error = status.error;
        }
    }
    first_error.map_or(CombinedStatus::Ready, CombinedStatus::Failed)
}

trait StatusInput: Send {
    fn status(&self) -> LiveStatus;
    fn changed(&mut self) -> BoxFuture<'_, bool>;
}

impl<T> StatusInput for watch::Receiver<LiveState<T>>
where
    T: Send + Sync + 'static,
{
    fn status(&self) -> LiveStatus {
        self.borrow().status()
    }

    fn changed(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move { watch::Receiver::changed(self).await.is_ok() })
    }
}

struct Tracked {
    input: Box<dyn StatusInput>,
    open: bool,
}

/// Live view over the combined status of tracked subscriptions.
///
/// The coordinator holds extra receivers only; the subscriptions stay owned
/// by the caller and keep running independently.
#[derive(Default)]
pub struct SubscriptionCoordinator {
    inputs: Vec<Tracked>,
}

impl SubscriptionCoordinator {
    /// Coordinator with no inputs; its status is ready.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscription` after the inputs tracked so far.
    #[must_use]
    pub fn track<T>(mut self, subscription: &Subscription<T>) -> Self
    where
        T: Clone + Default + Send + Sync + 'static,
    {
        self.inputs.push(Tracked {
            input: Box::new(subscription.watch()),
            open: true,
        });
        self
    }

    /// Current combined status.
    pub fn status(&self) -> CombinedStatus {
        combine(self.inputs.iter().map(|tracked| tracked.input.status()))
    }

    /// Wait until any tracked input publishes, then return the new combined
    /// status. Returns `None` when no input can publish any more.
    pub async fn changed(&mut self) -> Option<CombinedStatus> {
        loop {
            let waiting: Vec<(usize, BoxFuture<'_, bool>)> = self
                .inputs
                .iter_mut()
                .enumerate()
                .filter(|(_, tracked)| tracked.open)
                .map(|(index, tracked)| (index, tracked.input.changed()))
                .collect();
            if waiting.is_empty() {
                return None;
            }
            let (indices, futures): (Vec<usize>, Vec<_>) = waiting.into_iter().unzip();
            let (published, winner, rest) = select_all(futures).await;
            drop(rest);
            if published {
                return Some(self.status());
            }
            if let Some(tracked) = indices.get(winner).and_then(|index| self.inputs.get_mut(*index)) {
                tracked.open = false;
            }
        }
    }

    /// Wait until the combined status is no longer loading.
    ///
    /// Returns the loading status itself if every input stops publishing
    /// before that happens.
    pub async fn settled(&mut self) -> CombinedStatus {
        loop {
            let status = self.status();
            if status != CombinedStatus::Loading {
                return status;
            }
            if self.changed().await.is_none() {
                return self.status();
            }
        }
    }
}
