//! Session context
//!
//! All mutable client-side state (provider registries, the command map, the
//! settings document) hangs off one `Session` with an explicit lifecycle:
//! created at host startup, passed around by `Arc`, shut down at host
//! shutdown. Nothing here is an ambient singleton.

use tracing::info;

use crate::client::commands::CommandRegistry;
use crate::client::features::hover::HoverService;
use crate::client::features::location::{NamedLocationService, TextDocumentLocationService};
use crate::client::features::search::{IssueResultsService, QueryTransformerRegistry};
use crate::client::settings::SettingsService;

/// Owns every registry and service of one client session.
pub struct Session {
    pub hover: HoverService,
    pub definition: TextDocumentLocationService,
    pub references: TextDocumentLocationService,
    pub locations: NamedLocationService,
    pub query_transformer: QueryTransformerRegistry,
    pub issue_results: IssueResultsService,
    pub commands: CommandRegistry,
    pub settings: SettingsService,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            hover: HoverService::new(),
            definition: TextDocumentLocationService::new("definition"),
            references: TextDocumentLocationService::new("references"),
            locations: NamedLocationService::new(),
            query_transformer: QueryTransformerRegistry::new(),
            issue_results: IssueResultsService::new(),
            commands: CommandRegistry::new(),
            settings: SettingsService::new(),
        }
    }

    /// Tears down session-owned registrations. Provider registrations are
    /// removed by their owners' handles (or by dropping the session); the
    /// command map is cleared here so no stale handler survives the session.
    pub fn shutdown(&self) {
        self.commands.clear();
        info!("session shut down");
    }
}
