//! Command registry
//!
//! Maps string command ids to executable handlers. Lookup is synchronous,
//! execution is asynchronous, and the registry itself performs no argument
//! validation; that is each command's own responsibility.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::metrics;

/// Errors surfaced by command registration, dispatch, and the builtin
/// commands' argument validation.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command not found: {0}")]
    UnknownCommand(String),
    #[error("command already registered: {0}")]
    DuplicateCommand(String),
    #[error("invalid {command} arguments: {details}")]
    InvalidArguments { command: &'static str, details: String },
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

/// A command implementation: positional JSON arguments in, JSON result out.
pub type CommandRun =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Handle removing one command registration; disposal is idempotent and only
/// ever removes the registration it was returned for.
pub struct CommandHandle {
    id: String,
    run: CommandRun,
    registry: Arc<DashMap<String, CommandRun>>,
    disposed: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("id", &self.id)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl CommandHandle {
    pub fn command(&self) -> &str {
        &self.id
    }

    pub fn dispose(&self) {
        use std::sync::atomic::Ordering;
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.registry
                .remove_if(&self.id, |_, existing| Arc::ptr_eq(existing, &self.run));
            debug!(command = %self.id, "command unregistered");
        }
    }
}

/// Registry of executable commands, builtin and extension-contributed.
#[derive(Default)]
pub struct CommandRegistry {
    commands: Arc<DashMap<String, CommandRun>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `run` under `id`. Fails with
    /// [`CommandError::DuplicateCommand`] when the id is taken, leaving the
    /// existing registration untouched.
    pub fn register(
        &self,
        id: impl Into<String>,
        run: CommandRun,
    ) -> Result<CommandHandle, CommandError> {
        let id = id.into();
        match self.commands.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CommandError::DuplicateCommand(id))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(run.clone());
                debug!(command = %id, "command registered");
                Ok(CommandHandle {
                    id,
                    run,
                    registry: self.commands.clone(),
                    disposed: std::sync::atomic::AtomicBool::new(false),
                })
            }
        }
    }

    /// Looks up `id` synchronously and executes it asynchronously, passing
    /// the handler's settled result through unchanged.
    pub async fn execute(&self, id: &str, args: Vec<Value>) -> Result<Value, CommandError> {
        let run = self
            .commands
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CommandError::UnknownCommand(id.to_owned()))?;
        metrics::metrics().record_command(id);
        let started = std::time::Instant::now();
        let result = run(args).await.map_err(CommandError::Execution);
        metrics::metrics().record_operation(id, started.elapsed());
        result
    }

    pub fn contains(&self, id: &str) -> bool {
        self.commands.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Removes every registration; part of session shutdown.
    pub fn clear(&self) {
        self.commands.clear();
    }
}

/// Wraps a plain async closure as a [`CommandRun`].
pub fn command_fn<F, Fut>(f: F) -> CommandRun
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}
