//! Demo binary: wires a client session to an in-process extension host over
//! the loopback connection, registers a few remote providers, and prints the
//! combined results of one query per feature. Useful as a smoke check and as
//! executable documentation of the public API.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::info;
use url::Url;

use extension_host_client::client::connection::{ConnectionError, LoopbackConnection, loopback_pair};
use extension_host_client::client::proxy::RemoteProxyDispatch;
use extension_host_client::client::session::Session;
use extension_host_client::logging;
use extension_host_client::metrics;
use extension_host_client::types::{Position, TextDocumentIdentity};

#[derive(Parser, Debug)]
#[command(name = "extension-host-client", about = "Extension host client demo")]
struct Args {
    /// Disable ANSI colors in stderr log output
    #[arg(long)]
    no_color: bool,

    /// Log level for stderr output (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Also write a debug-level session log file to the cache directory
    #[arg(long)]
    log_file: bool,
}

/// Installs a toy extension host on the peer half: it answers every
/// `$provide*` invocation with canned results derived from the registration
/// id.
fn install_demo_host(host: &LoopbackConnection) {
    host.set_request_handler(Arc::new(|method, params| {
        Box::pin(async move {
            let id = params.get(0).and_then(Value::as_u64).unwrap_or(0);
            match method.as_str() {
                "$provideHover" => Ok(json!({
                    "contents": [
                        { "kind": "markdown", "value": format!("**hover from provider {id}**") }
                    ]
                })),
                "$provideDefinition" => Ok(json!([
                    { "uri": format!("file:///definitions/{id}.rs") }
                ])),
                "$transformQuery" => {
                    let query = params.get(1).and_then(Value::as_str).unwrap_or_default();
                    Ok(json!(format!("{query} repo:demo")))
                }
                "$provideIssueResults" => Ok(json!([{
                    "title": format!("Issue found by provider {id}"),
                    "url": "https://issues.example.com/1"
                }])),
                other => Err(ConnectionError::MethodNotFound(other.to_owned())),
            }
        })
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = logging::init_logger(args.no_color, args.log_level.as_deref(), args.log_file)?;

    let session = Arc::new(Session::new());
    let (client_side, host_side) = loopback_pair();
    install_demo_host(&host_side);
    let dispatch = RemoteProxyDispatch::new(session.clone(), client_side);

    // The peer would normally issue these registration calls through the
    // transport; the demo feeds them straight into the dispatch.
    dispatch.dispatch("$registerHoverProvider", json!([1, ["*"]]))?;
    dispatch.dispatch("$registerHoverProvider", json!([2, ["*"]]))?;
    dispatch.dispatch("$registerDefinitionProvider", json!([3, ["*"]]))?;
    dispatch.dispatch("$registerQueryTransformer", json!([4]))?;
    dispatch.dispatch("$registerIssueResultsProvider", json!([5]))?;
    info!(registrations = dispatch.registration_count(), "remote providers registered");

    let document = TextDocumentIdentity::new(Url::parse("file:///demo/main.rs")?);
    let position = Position::new(3, 7);

    let hover = session.hover.get_hover(document.clone(), position).next().await.flatten();
    println!("hover: {}", serde_json::to_string_pretty(&hover)?);

    let definitions = session
        .definition
        .get_locations(document, position)
        .next()
        .await
        .unwrap_or_default();
    println!("definitions: {}", serde_json::to_string_pretty(&definitions)?);

    let query = session.query_transformer.transform_query("TODO".into()).await;
    println!("transformed query: {query}");

    let issues = session
        .issue_results
        .get_results(query)
        .next()
        .await
        .unwrap_or_default();
    println!("issues: {}", serde_json::to_string_pretty(&issues)?);

    // Unregister one hover provider and show the combined result shrinking.
    dispatch.dispatch("$unregister", json!([2]))?;
    let document = TextDocumentIdentity::new(Url::parse("file:///demo/main.rs")?);
    let hover = session.hover.get_hover(document, position).next().await.flatten();
    println!("hover after unregister: {}", serde_json::to_string_pretty(&hover)?);

    metrics::metrics().log_summary();
    session.shutdown();
    Ok(())
}
