//! Shared context for integration tests: a client session wired to a fake
//! extension host over the loopback connection.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};

use extension_host_client::client::connection::{
    ConnectionError, LoopbackConnection, loopback_pair,
};
use extension_host_client::client::proxy::RemoteProxyDispatch;
use extension_host_client::client::session::Session;
use extension_host_client::types::{Position, TextDocumentIdentity};
use url::Url;

pub struct IntegrationContext {
    pub session: Arc<Session>,
    pub dispatch: Arc<RemoteProxyDispatch>,
    pub host: Arc<LoopbackConnection>,
}

/// Builds a session plus a proxy dispatch whose connection talks to the
/// returned host half. Install a request handler on `host` to play the
/// extension-host role.
pub fn integration_context() -> IntegrationContext {
    let session = Arc::new(Session::new());
    let (client_side, host_side) = loopback_pair();
    let dispatch = Arc::new(RemoteProxyDispatch::new(session.clone(), client_side));
    IntegrationContext { session, dispatch, host: host_side }
}

/// Extension-host stand-in answering every provider invocation with results
/// labeled by the registration id.
pub fn install_labeled_host(host: &LoopbackConnection) {
    host.set_request_handler(Arc::new(|method, params| {
        Box::pin(async move {
            let id = params
                .get(0)
                .and_then(Value::as_u64)
                .ok_or_else(|| ConnectionError::Call("missing registration id".into()))?;
            match method.as_str() {
                "$provideHover" => Ok(json!({
                    "contents": [{ "kind": "plaintext", "value": format!("hover-{id}") }]
                })),
                "$provideDefinition" | "$provideReferences" | "$provideLocations" => {
                    Ok(json!([{ "uri": format!("file:///{id}") }]))
                }
                "$transformQuery" => {
                    let query = params.get(1).and_then(Value::as_str).unwrap_or_default();
                    Ok(json!(format!("{query} +{id}")))
                }
                "$provideIssueResults" => Ok(json!([{
                    "title": format!("issue-{id}"),
                    "url": format!("https://issues.example.com/{id}")
                }])),
                other => Err(ConnectionError::MethodNotFound(other.to_owned())),
            }
        })
    }));
}

pub fn test_document() -> TextDocumentIdentity {
    TextDocumentIdentity::new(Url::parse("file:///f").unwrap())
}

pub fn test_position() -> Position {
    Position::new(1, 2)
}
