//! Connection seam to the extension host
//!
//! The wire encoding is out of scope here: the rest of the crate only needs a
//! bidirectional call/notify primitive carrying JSON values. Production code
//! plugs a real transport in behind the [`Connection`] trait; tests and the
//! demo binary use the in-process [`loopback_pair`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;

/// Failure of a cross-boundary call.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("no handler for method {0}")]
    MethodNotFound(String),
    #[error("remote call failed: {0}")]
    Call(String),
}

/// A bidirectional connection: `call` awaits the peer's response, `notify`
/// is fire-and-forget. Correlation of responses to requests is the
/// transport's concern.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ConnectionError>;
    async fn notify(&self, method: &str, params: Value) -> Result<(), ConnectionError>;
}

/// Handler for calls arriving from the peer.
pub type RequestHandler =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, Result<Value, ConnectionError>> + Send + Sync>;

struct LoopbackShared {
    handler: RwLock<Option<RequestHandler>>,
}

/// One half of an in-process connection pair. Calls issued on this half are
/// dispatched to the handler installed on the peer half.
pub struct LoopbackConnection {
    peer: Arc<LoopbackShared>,
    local: Arc<LoopbackShared>,
}

impl LoopbackConnection {
    /// Installs the handler invoked for calls arriving from the peer.
    pub fn set_request_handler(&self, handler: RequestHandler) {
        *self.local.handler.write() = Some(handler);
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ConnectionError> {
        let handler = self.peer.handler.read().clone();
        match handler {
            Some(handler) => handler(method.to_owned(), params).await,
            None => Err(ConnectionError::Closed),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ConnectionError> {
        // Loopback has no one-way lane; a notify is a call whose result is
        // discarded.
        self.call(method, params).await.map(|_| ())
    }
}

/// Creates two connected in-process halves.
pub fn loopback_pair() -> (Arc<LoopbackConnection>, Arc<LoopbackConnection>) {
    let a = Arc::new(LoopbackShared { handler: RwLock::new(None) });
    let b = Arc::new(LoopbackShared { handler: RwLock::new(None) });
    let left = Arc::new(LoopbackConnection { peer: b.clone(), local: a.clone() });
    let right = Arc::new(LoopbackConnection { peer: a, local: b });
    (left, right)
}
