//! Multi-source result aggregation
//!
//! Combines the latest output of every active provider for one query into a
//! single result stream. The combination is gated by an "all have spoken"
//! barrier: no combined value is emitted until every currently active provider
//! has answered at least once, because combining the instant the fastest
//! provider answers would intermittently drop slower providers' contributions.
//! Once the barrier has been crossed, every subsequent change from any
//! provider re-emits the combination of the latest values.
//!
//! The barrier is implemented as an explicit per-slot state machine inside a
//! hand-written `Stream`, not with a generic stream-combination operator: the
//! initial-emission suppression is a correctness property of this module, not
//! a library default we happen to inherit.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::client::registry::{ProviderError, ProviderRegistration};
use crate::metrics;

/// Invocation stream returned by a provider for one query: each item is the
/// provider's newest answer (`Ok(None)` means "answered, no result").
pub type InvocationStream<T> = BoxStream<'static, Result<Option<T>, ProviderError>>;

/// Combination function applied to the latest answers, in registration order.
pub type Combine<T, R> = Box<dyn FnMut(Vec<Option<T>>) -> R + Send>;

/// One active provider as seen by the aggregation: its registry id plus a
/// thunk producing the invocation stream. The thunk runs once, when the
/// provider first appears in the active set.
pub struct ProviderInvocation<T> {
    pub id: u64,
    pub invoke: Arc<dyn Fn() -> InvocationStream<T> + Send + Sync>,
}

enum SlotState<T> {
    /// The provider has not answered yet; the barrier stays closed.
    Pending,
    /// Latest answer from the provider (`None` = answered without a result,
    /// which also covers isolated invocation failures).
    Answered(Option<T>),
}

struct ProviderSlot<T> {
    id: u64,
    /// `None` once the invocation stream completed.
    stream: Option<InvocationStream<T>>,
    state: SlotState<T>,
}

/// Stream of combined results over a dynamically changing provider set.
///
/// Dropping the stream drops every underlying invocation stream, which
/// cancels in-flight provider calls.
pub struct AggregatedResults<T, R> {
    providers: BoxStream<'static, Vec<ProviderInvocation<T>>>,
    providers_done: bool,
    seen_snapshot: bool,
    slots: Vec<ProviderSlot<T>>,
    dirty: bool,
    combine: Combine<T, R>,
}

impl<T, R> AggregatedResults<T, R> {
    pub fn new(
        providers: BoxStream<'static, Vec<ProviderInvocation<T>>>,
        combine: impl FnMut(Vec<Option<T>>) -> R + Send + 'static,
    ) -> Self {
        Self {
            providers,
            providers_done: false,
            seen_snapshot: false,
            slots: Vec::new(),
            dirty: false,
            combine: Box::new(combine),
        }
    }

    /// Re-derives the slot list from a new active set. Surviving providers
    /// keep their slot (latest value and live invocation stream; they are not
    /// re-invoked); added providers start `Pending`, which re-arms the
    /// barrier; removed providers are dropped and, if one of them was the
    /// only slot still pending, the barrier opens.
    fn sync_slots(&mut self, set: Vec<ProviderInvocation<T>>) {
        let mut created = false;
        let mut next = Vec::with_capacity(set.len());
        for invocation in set {
            match self.slots.iter().position(|slot| slot.id == invocation.id) {
                Some(index) => next.push(self.slots.swap_remove(index)),
                None => {
                    created = true;
                    next.push(ProviderSlot {
                        id: invocation.id,
                        stream: Some((invocation.invoke)()),
                        state: SlotState::Pending,
                    });
                }
            }
        }
        let removed = !self.slots.is_empty();
        self.slots = next;
        if created || removed || !self.seen_snapshot {
            debug!(
                active = self.slots.len(),
                created, removed, "active provider set changed"
            );
            self.dirty = true;
        }
        self.seen_snapshot = true;
    }

    fn barrier_open(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| matches!(slot.state, SlotState::Answered(_)))
    }
}

impl<T, R> Stream for AggregatedResults<T, R>
where
    T: Clone + Unpin,
{
    type Item = R;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // Apply provider set changes first so a provider added in this tick
        // arms the barrier before any emission below.
        while let Poll::Ready(next) = this.providers.poll_next_unpin(cx) {
            match next {
                Some(set) => this.sync_slots(set),
                None => {
                    this.providers_done = true;
                    break;
                }
            }
        }

        // Drain every invocation stream, keeping only each provider's latest
        // answer: once a fresher value has arrived, the stale one is gone.
        for slot in &mut this.slots {
            let Some(stream) = slot.stream.as_mut() else { continue };
            loop {
                match stream.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(value))) => {
                        slot.state = SlotState::Answered(value);
                        this.dirty = true;
                    }
                    Poll::Ready(Some(Err(error))) => {
                        // One failing provider must not abort the whole
                        // aggregation; its slot turns into an empty answer and
                        // the failure goes out through the diagnostic side
                        // channel.
                        warn!(provider = slot.id, %error, "provider invocation failed");
                        metrics::metrics().record_provider_failure();
                        slot.state = SlotState::Answered(None);
                        this.dirty = true;
                    }
                    Poll::Ready(None) => {
                        if matches!(slot.state, SlotState::Pending) {
                            // Completed without ever answering: the provider
                            // definitively has nothing, so it must not hold
                            // the barrier closed forever.
                            warn!(provider = slot.id, "provider completed without answering");
                            slot.state = SlotState::Answered(None);
                            this.dirty = true;
                        }
                        slot.stream = None;
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }

        if this.dirty && this.barrier_open() {
            this.dirty = false;
            let values: Vec<Option<T>> = this
                .slots
                .iter()
                .map(|slot| match &slot.state {
                    SlotState::Answered(value) => value.clone(),
                    SlotState::Pending => None,
                })
                .collect();
            return Poll::Ready(Some((this.combine)(values)));
        }

        if this.providers_done
            && !this.dirty
            && this.slots.iter().all(|slot| slot.stream.is_none())
        {
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

/// Builds an [`AggregatedResults`] stream from a registry's live entry stream,
/// a per-entry invocation function, and a combination function applied to the
/// latest answers in registration order.
pub fn aggregate<S, P, T, R>(
    providers: BoxStream<'static, Vec<Arc<ProviderRegistration<S, P>>>>,
    invoke: impl Fn(&ProviderRegistration<S, P>) -> InvocationStream<T> + Send + Sync + 'static,
    combine: impl FnMut(Vec<Option<T>>) -> R + Send + 'static,
) -> AggregatedResults<T, R>
where
    S: Send + Sync + 'static,
    P: Send + Sync + 'static,
    T: Send + Unpin + 'static,
    R: Send + 'static,
{
    let invoke = Arc::new(invoke);
    let invocations = providers
        .map(move |entries| {
            entries
                .into_iter()
                .map(|entry| {
                    let invoke = invoke.clone();
                    ProviderInvocation {
                        id: entry.id,
                        invoke: Arc::new(move || (invoke)(&entry)),
                    }
                })
                .collect()
        })
        .boxed();
    AggregatedResults::new(invocations, combine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    type Answer = Result<Option<Vec<&'static str>>, ProviderError>;

    fn ready_provider(id: u64, value: &'static str) -> ProviderInvocation<Vec<&'static str>> {
        ProviderInvocation {
            id,
            invoke: Arc::new(move || {
                futures::stream::once(async move { Ok(Some(vec![value])) }).boxed()
            }),
        }
    }

    fn channel_provider(
        id: u64,
    ) -> (ProviderInvocation<Vec<&'static str>>, mpsc::Sender<Answer>) {
        let (tx, rx) = mpsc::channel(8);
        let rx = parking_lot::Mutex::new(Some(rx));
        let invocation = ProviderInvocation {
            id,
            invoke: Arc::new(move || {
                let rx = rx.lock().take().expect("invoked more than once");
                ReceiverStream::new(rx).boxed()
            }),
        };
        (invocation, tx)
    }

    fn concat(values: Vec<Option<Vec<&'static str>>>) -> Vec<&'static str> {
        values.into_iter().flatten().flatten().collect()
    }

    fn aggregated(
        rx: mpsc::Receiver<Vec<ProviderInvocation<Vec<&'static str>>>>,
    ) -> AggregatedResults<Vec<&'static str>, Vec<&'static str>> {
        AggregatedResults::new(ReceiverStream::new(rx).boxed(), concat)
    }

    async fn assert_silent<S: Stream + Unpin>(stream: &mut S) {
        let next = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(next.is_err(), "stream emitted while the barrier was armed");
    }

    #[tokio::test]
    async fn test_empty_set_emits_sentinel() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        set_tx.send(vec![]).await.unwrap();
        assert_eq!(results.next().await.unwrap(), Vec::<&str>::new());
    }

    #[tokio::test]
    async fn test_barrier_waits_for_slowest_provider() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        let (slow, slow_tx) = channel_provider(2);
        set_tx.send(vec![ready_provider(1, "a"), slow]).await.unwrap();

        // The fast provider answered, but the barrier holds until the slow
        // one speaks.
        assert_silent(&mut results).await;

        slow_tx.send(Ok(Some(vec!["b"]))).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_combination_follows_registration_order() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        let (slow, slow_tx) = channel_provider(1);
        set_tx.send(vec![slow, ready_provider(2, "b")]).await.unwrap();
        slow_tx.send(Ok(Some(vec!["a"]))).await.unwrap();

        // Slot 1 answered last but still comes first in the combination.
        assert_eq!(results.next().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_removal_of_blocking_provider_opens_barrier() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        let fast = ready_provider(1, "a");
        let (never, _never_tx) = channel_provider(2);
        set_tx.send(vec![fast, never]).await.unwrap();
        assert_silent(&mut results).await;

        set_tx.send(vec![ready_provider(1, "a")]).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_removal_emits_without_waiting_for_others() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        let (a, a_tx) = channel_provider(1);
        let (b, b_tx) = channel_provider(2);
        set_tx.send(vec![a, b]).await.unwrap();
        a_tx.send(Ok(Some(vec!["a"]))).await.unwrap();
        b_tx.send(Ok(Some(vec!["b"]))).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["a", "b"]);

        // Dropping provider 2 re-emits immediately from retained values; no
        // provider is asked to answer again.
        let (a2, _a2_tx) = channel_provider(1);
        set_tx.send(vec![a2]).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_adding_provider_rearms_barrier() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        set_tx.send(vec![ready_provider(1, "a")]).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["a"]);

        let (b, b_tx) = channel_provider(2);
        let (a2, _a2_tx) = channel_provider(1);
        set_tx.send(vec![a2, b]).await.unwrap();

        // The newcomer holds further emissions back until it answers.
        assert_silent(&mut results).await;
        b_tx.send(Ok(Some(vec!["b"]))).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_retained_provider_is_not_reinvoked() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        let invocations = Arc::new(AtomicU32::new(0));
        let counter = invocations.clone();
        let counted = ProviderInvocation {
            id: 1,
            invoke: Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                futures::stream::once(async { Ok(Some(vec!["a"])) }).boxed()
            }),
        };

        set_tx.send(vec![counted]).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["a"]);

        // Same id retained across a membership change.
        let (dummy_a, _keep) = channel_provider(1);
        set_tx.send(vec![dummy_a, ready_provider(2, "b")]).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["a", "b"]);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_provider_is_isolated() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        let failing = ProviderInvocation {
            id: 1,
            invoke: Arc::new(|| {
                futures::stream::once(async {
                    Err(ProviderError::Invocation("boom".into()))
                })
                .boxed()
            }),
        };
        set_tx.send(vec![failing, ready_provider(2, "b")]).await.unwrap();

        assert_eq!(results.next().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_provider_completing_silently_counts_as_answered() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        let silent = ProviderInvocation {
            id: 1,
            invoke: Arc::new(|| futures::stream::empty().boxed()),
        };
        set_tx.send(vec![silent, ready_provider(2, "b")]).await.unwrap();

        assert_eq!(results.next().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_update_after_barrier_reemits() {
        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);

        let (a, a_tx) = channel_provider(1);
        set_tx.send(vec![a]).await.unwrap();

        a_tx.send(Ok(Some(vec!["v1"]))).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["v1"]);

        a_tx.send(Ok(Some(vec!["v2"]))).await.unwrap();
        assert_eq!(results.next().await.unwrap(), vec!["v2"]);

        a_tx.send(Ok(None)).await.unwrap();
        assert_eq!(results.next().await.unwrap(), Vec::<&str>::new());
    }

    #[tokio::test]
    async fn test_dropping_aggregation_drops_invocation_streams() {
        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let guarded = ProviderInvocation::<Vec<&'static str>> {
            id: 1,
            invoke: Arc::new(move || {
                let guard = DropFlag(flag.clone());
                futures::stream::pending()
                    .map(move |item: Answer| {
                        let _ = &guard;
                        item
                    })
                    .boxed()
            }),
        };

        let (set_tx, set_rx) = mpsc::channel(4);
        let mut results = aggregated(set_rx);
        set_tx.send(vec![guarded]).await.unwrap();
        assert_silent(&mut results).await;
        assert!(!dropped.load(Ordering::SeqCst));

        drop(results);
        assert!(dropped.load(Ordering::SeqCst), "invocation stream must be canceled");
    }
}
