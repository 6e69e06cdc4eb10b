//! Hover feature
//!
//! Hover is a scalar feature: the combined result is one `Hover` whose
//! `contents` concatenate every answering provider's contents in registration
//! order, or `None` when no active provider has content.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;

use crate::client::aggregator::{InvocationStream, aggregate};
use crate::client::registry::{ProviderRegistry, RegistrationHandle};
use crate::client::selector::DocumentSelector;
use crate::metrics;
use crate::types::{Hover, Position, TextDocumentIdentity, TextDocumentPositionParams};

/// Per-query hover invocation.
pub type ProvideHoverSignature =
    Arc<dyn Fn(TextDocumentPositionParams) -> InvocationStream<Hover> + Send + Sync>;

/// Registry plus aggregation for hover providers.
#[derive(Default)]
pub struct HoverService {
    registry: ProviderRegistry<(), ProvideHoverSignature>,
}

impl HoverService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(
        &self,
        selector: DocumentSelector,
        provider: ProvideHoverSignature,
    ) -> RegistrationHandle {
        self.registry.register(selector, (), provider)
    }

    /// Continuously-updated combined hover for one document position.
    pub fn get_hover(
        &self,
        document: TextDocumentIdentity,
        position: Position,
    ) -> BoxStream<'static, Option<Hover>> {
        metrics::metrics().record_query("hover");
        let params = TextDocumentPositionParams::new(document.uri.clone(), position);
        aggregate(
            self.registry.providers_for(document),
            move |entry| (entry.provider)(params.clone()),
            merge_hovers,
        )
        .boxed()
    }
}

/// Concatenates the answering providers' hover contents, in registration
/// order; the range comes from the first provider that supplied one.
fn merge_hovers(values: Vec<Option<Hover>>) -> Option<Hover> {
    let mut contents = Vec::new();
    let mut range = None;
    for hover in values.into_iter().flatten() {
        contents.extend(hover.contents);
        if range.is_none() {
            range = hover.range;
        }
    }
    if contents.is_empty() {
        None
    } else {
        Some(Hover { contents, range })
    }
}
