//! Dynamic provider registry
//!
//! Owns the set of (selector, params, provider) entries for one feature.
//! Entries live behind a `tokio::sync::watch` channel so that every consumer
//! reads a consistent copy-on-write snapshot and in-flight queries observe
//! registrations and removals as they happen. Entry order is registration
//! order, which downstream aggregation uses as the tie-break order when
//! combining results.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::client::connection::ConnectionError;
use crate::client::selector::DocumentSelector;
use crate::types::TextDocumentIdentity;

/// Failure of a single provider invocation.
///
/// Aggregation isolates these: the failing provider contributes nothing and
/// the other providers keep contributing.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider invocation failed: {0}")]
    Invocation(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("malformed provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One registered provider entry. Immutable once created; the registry only
/// supports add and remove.
pub struct ProviderRegistration<S, P> {
    pub id: u64,
    pub selector: DocumentSelector,
    pub params: S,
    pub provider: P,
}

type Entries<S, P> = Arc<Vec<Arc<ProviderRegistration<S, P>>>>;

struct RegistryShared<S, P> {
    entries: watch::Sender<Entries<S, P>>,
    next_id: AtomicU64,
}

impl<S, P> RegistryShared<S, P> {
    fn remove(&self, id: u64) {
        self.entries.send_if_modified(|entries| {
            let retained: Vec<_> = entries.iter().filter(|e| e.id != id).cloned().collect();
            if retained.len() == entries.len() {
                return false;
            }
            *entries = Arc::new(retained);
            true
        });
    }
}

/// Handle returned by [`ProviderRegistry::register`]; `dispose` removes
/// exactly that entry and is idempotent. The handle holds only a weak
/// back-reference, so a dropped registry makes disposal a no-op.
pub struct RegistrationHandle {
    id: u64,
    disposed: AtomicBool,
    unregister: Box<dyn Fn() + Send + Sync>,
}

impl RegistrationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            (self.unregister)();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Registry of feature providers with selector-based matching.
pub struct ProviderRegistry<S, P> {
    shared: Arc<RegistryShared<S, P>>,
}

impl<S, P> Default for ProviderRegistry<S, P>
where
    S: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, P> ProviderRegistry<S, P>
where
    S: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (entries, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            shared: Arc::new(RegistryShared { entries, next_id: AtomicU64::new(0) }),
        }
    }

    /// Registers a provider. The entry is immediately visible to new
    /// subscriptions, and in-flight subscriptions are notified through the
    /// watch channel.
    pub fn register(&self, selector: DocumentSelector, params: S, provider: P) -> RegistrationHandle {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let registration = Arc::new(ProviderRegistration { id, selector, params, provider });
        self.shared.entries.send_modify(|entries| {
            let mut list = entries.as_ref().clone();
            list.push(registration);
            *entries = Arc::new(list);
        });
        debug!(id, "provider registered");

        let weak: Weak<RegistryShared<S, P>> = Arc::downgrade(&self.shared);
        RegistrationHandle {
            id,
            disposed: AtomicBool::new(false),
            unregister: Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.remove(id);
                    debug!(id, "provider unregistered");
                }
            }),
        }
    }

    /// Snapshot of all current entries, in registration order.
    pub fn snapshot(&self) -> Entries<S, P> {
        self.shared.entries.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.shared.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The live set of entries matching `document`: emits the current matching
    /// snapshot on subscribe and again whenever the matching subset changes.
    /// Changes to entries that do not match `document` are filtered out.
    pub fn providers_for(
        &self,
        document: TextDocumentIdentity,
    ) -> BoxStream<'static, Vec<Arc<ProviderRegistration<S, P>>>> {
        self.filtered_entry_stream(move |entry| entry.selector.matches(&document))
    }

    /// Like [`ProviderRegistry::providers_for`] but unfiltered; used by
    /// document-independent features such as search.
    pub fn all_providers(&self) -> BoxStream<'static, Vec<Arc<ProviderRegistration<S, P>>>> {
        self.filtered_entry_stream(|_| true)
    }

    fn filtered_entry_stream(
        &self,
        accepts: impl Fn(&ProviderRegistration<S, P>) -> bool + Send + 'static,
    ) -> BoxStream<'static, Vec<Arc<ProviderRegistration<S, P>>>> {
        let mut last_ids: Option<Vec<u64>> = None;
        WatchStream::new(self.shared.entries.subscribe())
            .filter_map(move |entries| {
                let matching: Vec<_> =
                    entries.iter().filter(|entry| accepts(entry)).cloned().collect();
                let ids: Vec<u64> = matching.iter().map(|entry| entry.id).collect();
                let changed = last_ids.as_ref() != Some(&ids);
                if changed {
                    last_ids = Some(ids);
                }
                futures::future::ready(changed.then_some(matching))
            })
            .boxed()
    }
}
