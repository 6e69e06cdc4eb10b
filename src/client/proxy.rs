//! Remote proxy dispatch
//!
//! Bridges the local registries to an extension host across a call-based
//! connection with no shared memory. The peer registers providers under
//! caller-assigned numeric ids; the local entry created for such a
//! registration calls back to the peer (`$provideHover`, `$transformQuery`,
//! ...) with the same id, and `$unregister(id)` drops it again through the
//! [`DisposableSet`]. The id is only ever a back-reference to the remote
//! provider, never an owning pointer.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::connection::Connection;
use crate::client::disposables::DisposableSet;
use crate::client::features::hover::ProvideHoverSignature;
use crate::client::features::location::{LocationProviderOptions, ProvideLocationsSignature};
use crate::client::features::search::{ProvideIssueResultsSignature, TransformQuerySignature};
use crate::client::registry::ProviderError;
use crate::client::selector::DocumentSelector;
use crate::client::session::Session;
use crate::types::{Hover, IssueResult, Location};

/// Failure routing an incoming registration call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("invalid params for {method}: {details}")]
    InvalidParams { method: &'static str, details: String },
}

/// Per-connection bridge between the peer's registrations and the session's
/// registries.
pub struct RemoteProxyDispatch {
    session: Arc<Session>,
    connection: Arc<dyn Connection>,
    registrations: DisposableSet,
}

impl RemoteProxyDispatch {
    pub fn new(session: Arc<Session>, connection: Arc<dyn Connection>) -> Self {
        Self { session, connection, registrations: DisposableSet::new() }
    }

    /// Routes an incoming `$register*` / `$unregister` call from the peer.
    pub fn dispatch(&self, method: &str, params: Value) -> Result<(), DispatchError> {
        match method {
            "$registerHoverProvider" => {
                let (id, selector) = registration_params("$registerHoverProvider", params)?;
                self.register_hover_provider(id, selector);
            }
            "$registerDefinitionProvider" => {
                let (id, selector) = registration_params("$registerDefinitionProvider", params)?;
                self.register_definition_provider(id, selector);
            }
            "$registerReferenceProvider" => {
                let (id, selector) = registration_params("$registerReferenceProvider", params)?;
                self.register_reference_provider(id, selector);
            }
            "$registerLocationProvider" => {
                let (id, provider_id, selector): (u64, String, DocumentSelector) =
                    decode_params("$registerLocationProvider", params)?;
                self.register_location_provider(id, provider_id, selector);
            }
            "$registerQueryTransformer" => {
                let (id,): (u64,) = decode_params("$registerQueryTransformer", params)?;
                self.register_query_transformer(id);
            }
            "$registerIssueResultsProvider" => {
                let (id,): (u64,) = decode_params("$registerIssueResultsProvider", params)?;
                self.register_issue_results_provider(id);
            }
            "$unregister" => {
                let (id,): (u64,) = decode_params("$unregister", params)?;
                self.unregister(id);
            }
            other => return Err(DispatchError::UnknownMethod(other.to_owned())),
        }
        Ok(())
    }

    pub fn register_hover_provider(&self, id: u64, selector: DocumentSelector) {
        debug!(id, "registering remote hover provider");
        let connection = self.connection.clone();
        let provider: ProvideHoverSignature = Arc::new(move |params| {
            remote_invocation::<Hover>(connection.clone(), "$provideHover", json!([id, params]))
        });
        let handle = self.session.hover.register_provider(selector, provider);
        self.registrations.add(id, move || handle.dispose());
    }

    pub fn register_definition_provider(&self, id: u64, selector: DocumentSelector) {
        debug!(id, "registering remote definition provider");
        let provider = self.remote_location_provider("$provideDefinition", id);
        let handle = self.session.definition.register_provider(selector, provider);
        self.registrations.add(id, move || handle.dispose());
    }

    pub fn register_reference_provider(&self, id: u64, selector: DocumentSelector) {
        debug!(id, "registering remote reference provider");
        let provider = self.remote_location_provider("$provideReferences", id);
        let handle = self.session.references.register_provider(selector, provider);
        self.registrations.add(id, move || handle.dispose());
    }

    pub fn register_location_provider(
        &self,
        id: u64,
        provider_id: String,
        selector: DocumentSelector,
    ) {
        debug!(id, %provider_id, "registering remote location provider");
        let provider = self.remote_location_provider("$provideLocations", id);
        let handle = self.session.locations.register_provider(
            LocationProviderOptions { id: provider_id },
            selector,
            provider,
        );
        self.registrations.add(id, move || handle.dispose());
    }

    pub fn register_query_transformer(&self, id: u64) {
        debug!(id, "registering remote query transformer");
        let connection = self.connection.clone();
        let provider: TransformQuerySignature = Arc::new(move |query| {
            let connection = connection.clone();
            Box::pin(async move {
                let raw = connection.call("$transformQuery", json!([id, query])).await?;
                Ok(serde_json::from_value::<String>(raw)?)
            })
        });
        let handle = self.session.query_transformer.register_provider(provider);
        self.registrations.add(id, move || handle.dispose());
    }

    pub fn register_issue_results_provider(&self, id: u64) {
        debug!(id, "registering remote issue results provider");
        let connection = self.connection.clone();
        let provider: ProvideIssueResultsSignature = Arc::new(move |query| {
            let connection = connection.clone();
            futures::stream::once(async move {
                let raw = connection.call("$provideIssueResults", json!([id, query])).await?;
                Ok(serde_json::from_value::<Option<Vec<IssueResult>>>(raw)?)
            })
            .boxed()
        });
        let handle = self.session.issue_results.register_provider(provider);
        self.registrations.add(id, move || handle.dispose());
    }

    /// Removes whichever provider was registered under `id`; absent ids are
    /// a no-op.
    pub fn unregister(&self, id: u64) {
        debug!(id, "unregistering remote provider");
        self.registrations.remove(id);
    }

    /// Number of live remote registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    fn remote_location_provider(&self, method: &'static str, id: u64) -> ProvideLocationsSignature {
        let connection = self.connection.clone();
        Arc::new(move |params| {
            remote_invocation::<Vec<Location>>(connection.clone(), method, json!([id, params]))
        })
    }
}

/// Adapts a single remote call into the aggregator's invocation stream
/// shape: one answer, then completion. A `null` response is "answered, no
/// result"; transport and decode failures surface as provider errors.
fn remote_invocation<T>(
    connection: Arc<dyn Connection>,
    method: &'static str,
    params: Value,
) -> BoxStream<'static, Result<Option<T>, ProviderError>>
where
    T: DeserializeOwned + Send + 'static,
{
    futures::stream::once(async move {
        let raw = connection.call(method, params).await?;
        Ok(serde_json::from_value::<Option<T>>(raw)?)
    })
    .boxed()
}

fn registration_params(
    method: &'static str,
    params: Value,
) -> Result<(u64, DocumentSelector), DispatchError> {
    decode_params(method, params)
}

fn decode_params<T: DeserializeOwned>(
    method: &'static str,
    params: Value,
) -> Result<T, DispatchError> {
    serde_json::from_value(params)
        .map_err(|e| DispatchError::InvalidParams { method, details: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::connection::{ConnectionError, loopback_pair};
    use crate::types::{Position, TextDocumentIdentity};
    use url::Url;

    fn doc() -> TextDocumentIdentity {
        TextDocumentIdentity::new(Url::parse("file:///f").unwrap())
    }

    /// Extension-host stand-in answering provider invocations on the peer
    /// half of a loopback connection.
    fn answering_host(host: &crate::client::connection::LoopbackConnection) {
        host.set_request_handler(Arc::new(|method, params| {
            Box::pin(async move {
                let id = params
                    .get(0)
                    .and_then(Value::as_u64)
                    .ok_or_else(|| ConnectionError::Call("missing id".into()))?;
                match method.as_str() {
                    "$provideHover" => Ok(json!({
                        "contents": [{ "kind": "plaintext", "value": format!("hover-{id}") }]
                    })),
                    "$provideDefinition" | "$provideReferences" | "$provideLocations" => {
                        Ok(json!([{ "uri": format!("file:///{id}") }]))
                    }
                    "$transformQuery" => {
                        let query = params.get(1).and_then(Value::as_str).unwrap_or_default();
                        Ok(json!(format!("{query} +id:{id}")))
                    }
                    "$provideIssueResults" => Ok(json!([
                        { "title": format!("issue-{id}"), "url": "https://example.com/1" }
                    ])),
                    other => Err(ConnectionError::MethodNotFound(other.to_owned())),
                }
            })
        }));
    }

    #[tokio::test]
    async fn test_register_and_unregister_hover_provider() {
        let session = Arc::new(Session::new());
        let (client_side, host_side) = loopback_pair();
        answering_host(&host_side);
        let dispatch = RemoteProxyDispatch::new(session.clone(), client_side);

        dispatch
            .dispatch("$registerHoverProvider", json!([7, ["*"]]))
            .unwrap();
        let hover = session
            .hover
            .get_hover(doc(), Position::new(0, 0))
            .next()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hover.contents[0].value, "hover-7");

        dispatch.dispatch("$unregister", json!([7])).unwrap();
        let hover = session.hover.get_hover(doc(), Position::new(0, 0)).next().await.unwrap();
        assert!(hover.is_none());
    }

    #[tokio::test]
    async fn test_register_query_transformer_round_trip() {
        let session = Arc::new(Session::new());
        let (client_side, host_side) = loopback_pair();
        answering_host(&host_side);
        let dispatch = RemoteProxyDispatch::new(session.clone(), client_side);

        dispatch.dispatch("$registerQueryTransformer", json!([3])).unwrap();
        let transformed = session.query_transformer.transform_query("foo".into()).await;
        assert_eq!(transformed, "foo +id:3");
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected() {
        let session = Arc::new(Session::new());
        let (client_side, _host_side) = loopback_pair();
        let dispatch = RemoteProxyDispatch::new(session, client_side);

        let err = dispatch.dispatch("$registerEverything", json!([1])).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownMethod(m) if m == "$registerEverything"));
    }

    #[tokio::test]
    async fn test_invalid_params_are_rejected() {
        let session = Arc::new(Session::new());
        let (client_side, _host_side) = loopback_pair();
        let dispatch = RemoteProxyDispatch::new(session, client_side);

        let err = dispatch
            .dispatch("$registerHoverProvider", json!(["not-a-number"]))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParams { method: "$registerHoverProvider", .. }));
    }

    #[tokio::test]
    async fn test_unregister_absent_id_is_noop() {
        let session = Arc::new(Session::new());
        let (client_side, _host_side) = loopback_pair();
        let dispatch = RemoteProxyDispatch::new(session, client_side);

        dispatch.dispatch("$unregister", json!([42])).unwrap();
        assert_eq!(dispatch.registration_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_remote_call_is_isolated() {
        let session = Arc::new(Session::new());
        let (client_side, host_side) = loopback_pair();
        // Host that fails hover calls outright.
        host_side.set_request_handler(Arc::new(|_method, _params| {
            Box::pin(async { Err(ConnectionError::Call("host crashed".into())) })
        }));
        let dispatch = RemoteProxyDispatch::new(session.clone(), client_side);

        dispatch.dispatch("$registerHoverProvider", json!([1, ["*"]])).unwrap();
        let hover = session.hover.get_hover(doc(), Position::new(0, 0)).next().await.unwrap();
        assert!(hover.is_none(), "failed provider must resolve to the empty sentinel");
    }
}
