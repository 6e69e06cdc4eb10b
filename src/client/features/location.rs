//! Location-list features
//!
//! Definition and references are list-valued features over the same provider
//! shape; the combined result concatenates each provider's latest locations
//! in registration order. A third variant keys registrations by a provider
//! name so that commands can address one location feature among many
//! (`executeLocationProvider`).

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;

use crate::client::aggregator::{InvocationStream, aggregate};
use crate::client::registry::{ProviderRegistry, RegistrationHandle};
use crate::client::selector::DocumentSelector;
use crate::metrics;
use crate::types::{Location, Position, TextDocumentIdentity, TextDocumentPositionParams};

/// Per-query location invocation.
pub type ProvideLocationsSignature =
    Arc<dyn Fn(TextDocumentPositionParams) -> InvocationStream<Vec<Location>> + Send + Sync>;

/// Concatenates every answering provider's locations, preserving each
/// provider's internal ordering. No active providers means an empty list.
fn concat_locations(values: Vec<Option<Vec<Location>>>) -> Vec<Location> {
    values.into_iter().flatten().flatten().collect()
}

/// Registry plus aggregation for one location-list feature (definition,
/// references).
pub struct TextDocumentLocationService {
    name: &'static str,
    registry: ProviderRegistry<(), ProvideLocationsSignature>,
}

impl TextDocumentLocationService {
    pub fn new(name: &'static str) -> Self {
        Self { name, registry: ProviderRegistry::new() }
    }

    pub fn register_provider(
        &self,
        selector: DocumentSelector,
        provider: ProvideLocationsSignature,
    ) -> RegistrationHandle {
        self.registry.register(selector, (), provider)
    }

    /// Continuously-updated combined locations for one document position.
    pub fn get_locations(
        &self,
        document: TextDocumentIdentity,
        position: Position,
    ) -> BoxStream<'static, Vec<Location>> {
        metrics::metrics().record_query(self.name);
        let params = TextDocumentPositionParams::new(document.uri.clone(), position);
        aggregate(
            self.registry.providers_for(document),
            move |entry| (entry.provider)(params.clone()),
            concat_locations,
        )
        .boxed()
    }
}

/// Registration parameters for a named location provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationProviderOptions {
    pub id: String,
}

/// Location providers addressed by name: registrations carry a provider id,
/// and queries select both by id and by document selector.
#[derive(Default)]
pub struct NamedLocationService {
    registry: ProviderRegistry<LocationProviderOptions, ProvideLocationsSignature>,
}

impl NamedLocationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(
        &self,
        options: LocationProviderOptions,
        selector: DocumentSelector,
        provider: ProvideLocationsSignature,
    ) -> RegistrationHandle {
        self.registry.register(selector, options, provider)
    }

    /// Combined locations from the providers registered under `provider_id`
    /// that match `document`.
    pub fn get_locations(
        &self,
        provider_id: impl Into<String>,
        document: TextDocumentIdentity,
        position: Position,
    ) -> BoxStream<'static, Vec<Location>> {
        metrics::metrics().record_query("location");
        let provider_id = provider_id.into();
        let params = TextDocumentPositionParams::new(document.uri.clone(), position);
        let providers = self
            .registry
            .providers_for(document)
            .map(move |entries| {
                entries
                    .into_iter()
                    .filter(|entry| entry.params.id == provider_id)
                    .collect()
            })
            .boxed();
        aggregate(providers, move |entry| (entry.provider)(params.clone()), concat_locations)
            .boxed()
    }
}
