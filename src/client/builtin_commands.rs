//! Builtin client commands
//!
//! The commands every extension relies on: navigation (`open`, `openPanel`),
//! provider execution (`executeLocationProvider`), settings mutation
//! (`updateConfiguration`) and the two gateway queries (`queryGraphQL`,
//! `queryLSP`). Apart from the `updateConfiguration` argument parser these
//! are pure glue over the session and the [`ClientContext`] collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use url::Url;
use url::form_urlencoded;

use crate::client::commands::{CommandError, CommandHandle, CommandRegistry, command_fn};
use crate::client::session::Session;
use crate::client::settings::{KeyPath, KeySegment, SettingsEdit};
use crate::types::{Position, TextDocumentIdentity};

/// Host-environment collaborators for the builtin commands: navigation and
/// the two gateway transports. All side effects live behind this trait.
#[async_trait]
pub trait ClientContext: Send + Sync {
    /// Navigates to `url` (absolute, relative, or a bare `#fragment`).
    async fn open_url(&self, url: &str) -> anyhow::Result<()>;

    /// The current URL fragment, beginning with `#` when non-empty.
    fn current_fragment(&self) -> String;

    /// Forwards a GraphQL request to the code-host API.
    ///
    /// `might_contain_private_info` marks requests that may carry private
    /// data (such as repository names); callers must not route those to
    /// untrusted sinks.
    async fn query_graphql(
        &self,
        query: String,
        variables: Value,
        might_contain_private_info: bool,
    ) -> anyhow::Result<Value>;

    /// Forwards a batched request to the LSP gateway.
    async fn query_lsp(&self, requests: Value) -> anyhow::Result<Value>;
}

/// Registers the builtin client commands on `session.commands`. The returned
/// handles unregister them; they are also removed by `Session::shutdown`.
pub fn register_builtin_commands(
    session: &Arc<Session>,
    context: Arc<dyn ClientContext>,
) -> Result<Vec<CommandHandle>, CommandError> {
    let commands: &CommandRegistry = &session.commands;
    let mut handles = Vec::new();

    {
        let context = context.clone();
        handles.push(commands.register(
            "open",
            command_fn(move |args| {
                let context = context.clone();
                async move {
                    let url = required_string("open", &args, 0)?;
                    context.open_url(&url).await?;
                    Ok(Value::Null)
                }
            }),
        )?);
    }

    {
        let context = context.clone();
        handles.push(commands.register(
            "openPanel",
            command_fn(move |args| {
                let context = context.clone();
                async move {
                    let view_id = required_string("openPanel", &args, 0)?;
                    let url = url_for_open_panel(&view_id, &context.current_fragment());
                    context.open_url(&url).await?;
                    Ok(Value::Null)
                }
            }),
        )?);
    }

    {
        let session = session.clone();
        handles.push(commands.register(
            "executeLocationProvider",
            command_fn(move |args| {
                let session = session.clone();
                async move {
                    let id = required_string("executeLocationProvider", &args, 0)?;
                    let uri = required_string("executeLocationProvider", &args, 1)?;
                    let uri = Url::parse(&uri).map_err(|e| invalid(
                        "executeLocationProvider",
                        format!("2nd element is not a valid URI: {e}"),
                    ))?;
                    let position: Position =
                        serde_json::from_value(args.get(2).cloned().unwrap_or(Value::Null))
                            .map_err(|e| invalid(
                                "executeLocationProvider",
                                format!("3rd element is not a valid position: {e}"),
                            ))?;

                    // First combined emission; the empty-set sentinel makes
                    // this resolve to [] when nothing is registered.
                    let locations = session
                        .locations
                        .get_locations(id, TextDocumentIdentity::new(uri), position)
                        .next()
                        .await
                        .unwrap_or_default();
                    Ok(serde_json::to_value(locations)?)
                }
            }),
        )?);
    }

    {
        let session = session.clone();
        handles.push(commands.register(
            "updateConfiguration",
            command_fn(move |args| {
                let session = session.clone();
                async move {
                    let edit = convert_update_configuration_args(&args)?;
                    session.settings.update(edit)?;
                    Ok(Value::Null)
                }
            }),
        )?);
    }

    {
        let context = context.clone();
        handles.push(commands.register(
            "queryGraphQL",
            command_fn(move |args| {
                let context = context.clone();
                async move {
                    let query = required_string("queryGraphQL", &args, 0)?;
                    let variables = args.get(1).cloned().unwrap_or(Value::Null);
                    // The request may carry private info (such as repository
                    // names); flag it so the host can keep it away from
                    // untrusted sinks.
                    context.query_graphql(query, variables, true).await
                }
            }),
        )?);
    }

    handles.push(commands.register(
        "queryLSP",
        command_fn(move |args| {
            let context = context.clone();
            async move {
                let requests = args.into_iter().next().unwrap_or(Value::Null);
                context.query_lsp(requests).await
            }
        }),
    )?);

    Ok(handles)
}

/// Builds the URL fragment that opens the panel on `view_id`, preserving the
/// other parameters of `fragment`. Positional parameters such as `L1:2-3:4`
/// stay readable: `:` is left unescaped and empty-valued keys are rendered
/// without a trailing `=`.
pub fn url_for_open_panel(view_id: &str, fragment: &str) -> String {
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    let mut params: Vec<(String, String)> =
        form_urlencoded::parse(fragment.as_bytes()).into_owned().collect();
    match params.iter_mut().find(|(key, _)| key == "tab") {
        Some(param) => param.1 = view_id.to_owned(),
        None => params.push(("tab".to_owned(), view_id.to_owned())),
    }
    let encoded = params
        .iter()
        .map(|(key, value)| {
            let key: String = form_urlencoded::byte_serialize(key.as_bytes()).collect();
            if value.is_empty() {
                key
            } else {
                let value: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
                format!("{key}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("#{}", encoded.replace("%3A", ":"))
}

/// Parses `updateConfiguration` positional arguments into a settings edit.
///
/// Grammar: `[keyPath, value, null?, "json"?]` with arity 2 to 4; the key
/// path is a property-name string or an array of string/number segments; a
/// present 3rd element must be null; a 4th element must be the literal
/// `"json"` and selects JSON-decoding of a string `value`.
pub fn convert_update_configuration_args(args: &[Value]) -> Result<SettingsEdit, CommandError> {
    let describe = || serde_json::to_string(args).unwrap_or_else(|_| "<unserializable>".into());

    if !(2..=4).contains(&args.len()) {
        return Err(invalid(
            "updateConfiguration",
            format!("{} (wrong arity: expected 2 to 4 elements, got {})", describe(), args.len()),
        ));
    }

    let path: KeyPath = match &args[0] {
        Value::String(property) => vec![KeySegment::Property(property.clone())],
        Value::Array(segments) => segments
            .iter()
            .map(|segment| match segment {
                Value::String(property) => Ok(KeySegment::Property(property.clone())),
                Value::Number(n) => n
                    .as_u64()
                    .map(|index| KeySegment::Index(index as usize))
                    .ok_or_else(|| invalid(
                        "updateConfiguration",
                        format!("{} (key path numbers must be non-negative integers)", describe()),
                    )),
                _ => Err(invalid(
                    "updateConfiguration",
                    format!(
                        "{} (1st element, the key path, must be a string or an array of \
                         string|number segments)",
                        describe()
                    ),
                )),
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(invalid(
                "updateConfiguration",
                format!(
                    "{} (1st element, the key path, must be a string or an array of \
                     string|number segments)",
                    describe()
                ),
            ));
        }
    };

    if let Some(third) = args.get(2) {
        if !third.is_null() {
            return Err(invalid(
                "updateConfiguration",
                format!("{} (3rd element must be null)", describe()),
            ));
        }
    }

    let value = if args.len() == 4 {
        match &args[3] {
            Value::String(marker) if marker == "json" => {
                let encoded = args[1].as_str().ok_or_else(|| invalid(
                    "updateConfiguration",
                    format!("{} (value must be a string when the 4th element is \"json\")", describe()),
                ))?;
                serde_json::from_str(encoded).map_err(|e| invalid(
                    "updateConfiguration",
                    format!("{} (value is not valid JSON: {e})", describe()),
                ))?
            }
            _ => {
                return Err(invalid(
                    "updateConfiguration",
                    format!("{} (4th element must be the string \"json\")", describe()),
                ));
            }
        }
    } else {
        args[1].clone()
    };

    Ok(SettingsEdit { path, value })
}

fn invalid(command: &'static str, details: String) -> CommandError {
    CommandError::InvalidArguments { command, details }
}

fn required_string(
    command: &'static str,
    args: &[Value],
    index: usize,
) -> Result<String, CommandError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| invalid(command, format!("argument {} must be a string", index + 1)))
}
