//! Command handlers and the name-to-closure router
//!
//! Applications describe their commands once at setup time. Handlers run
//! synchronously on tokio's blocking pool, so they may do blocking work
//! without stalling other applications' listeners.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use walls_core::CommandError;
use walls_protocol::{CommandArgs, CommandInfo, CommandResponse};

/// Result of invoking a command handler
pub type HandlerResult = Result<CommandResponse, CommandError>;

/// An application's command handler
pub trait CommandHandler: Send + Sync + 'static {
    /// Handle `command` with `args`
    ///
    /// Returning `Err` produces an error response carrying the error's
    /// message; the connection and the listener are unaffected.
    fn handle(&self, command: &str, args: &CommandArgs) -> HandlerResult;

    /// Commands advertised through the built-in `help` command
    fn commands(&self) -> Vec<CommandInfo> {
        Vec::new()
    }
}

impl<F> CommandHandler for F
where
    F: Fn(&str, &CommandArgs) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, command: &str, args: &CommandArgs) -> HandlerResult {
        self(command, args)
    }
}

type RouteFn = Box<dyn Fn(&CommandArgs) -> HandlerResult + Send + Sync>;

struct Route {
    description: String,
    handler: RouteFn,
}

/// Dispatches commands by name to closures registered at setup
///
/// ```ignore
/// let router = CommandRouter::new()
///     .route("echo", "Return the arguments", |args| {
///         Ok(CommandResponse::with_data(Value::Object(args.clone())))
///     })
///     .route("volume", "Set the volume", set_volume);
/// ```
#[derive(Default)]
pub struct CommandRouter {
    routes: BTreeMap<String, Route>,
}

impl CommandRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command; a later route with the same name replaces the earlier one
    pub fn route<F>(mut self, name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CommandArgs) -> HandlerResult + Send + Sync + 'static,
    {
        let name = name.into();
        if self.routes.contains_key(&name) {
            tracing::warn!("Replacing handler for command '{}'", name);
        }
        self.routes.insert(
            name,
            Route {
                description: description.into(),
                handler: Box::new(f),
            },
        );
        self
    }

    /// Whether `name` has a route
    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the router has no routes
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl CommandHandler for CommandRouter {
    fn handle(&self, command: &str, args: &CommandArgs) -> HandlerResult {
        match self.routes.get(command) {
            Some(route) => (route.handler)(args),
            None => Err(CommandError::UnknownCommand(command.to_string())),
        }
    }

    fn commands(&self) -> Vec<CommandInfo> {
        self.routes
            .iter()
            .map(|(name, route)| CommandInfo::new(name.clone(), route.description.clone()))
            .collect()
    }
}

impl fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRouter")
            .field("commands", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Required string argument
pub fn str_arg<'a>(args: &'a CommandArgs, name: &str) -> Result<&'a str, CommandError> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(invalid(name, format!("expected a string, got {}", other))),
        None => Err(invalid(name, "missing")),
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> CommandError {
    CommandError::InvalidArgument {
        name: name.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> CommandArgs {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn router() -> CommandRouter {
        CommandRouter::new()
            .route("echo", "Return the arguments", |args| {
                Ok(CommandResponse::with_data(Value::Object(args.clone())))
            })
            .route("fail", "Always fails", |_| {
                Err(CommandError::handler("device unavailable"))
            })
    }

    #[test]
    fn test_router_dispatches_by_name() {
        let response = router().handle("echo", &args(json!({"x": 1}))).unwrap();
        assert!(response.is_success());
        assert_eq!(response.data, Some(json!({"x": 1})));
    }

    #[test]
    fn test_router_unknown_command() {
        let err = router().handle("rewind", &CommandArgs::new()).unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("rewind".to_string()));
        assert_eq!(err.to_string(), "unknown command: rewind");
    }

    #[test]
    fn test_router_handler_error() {
        let err = router().handle("fail", &CommandArgs::new()).unwrap_err();
        assert_eq!(err.to_string(), "device unavailable");
    }

    #[test]
    fn test_router_lists_commands_sorted() {
        let names: Vec<_> = router().commands().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["echo", "fail"]);
    }

    #[test]
    fn test_closure_is_a_handler() {
        let handler = |command: &str, _: &CommandArgs| -> HandlerResult {
            Ok(CommandResponse::ok(command.to_uppercase()))
        };
        let response = handler.handle("play", &CommandArgs::new()).unwrap();
        assert_eq!(response.message.as_deref(), Some("PLAY"));
        assert!(CommandHandler::commands(&handler).is_empty());
    }

    #[test]
    fn test_str_arg() {
        let a = args(json!({"name": "rag", "level": 40}));
        assert_eq!(str_arg(&a, "name").unwrap(), "rag");
        assert!(matches!(
            str_arg(&a, "level"),
            Err(CommandError::InvalidArgument { .. })
        ));
        assert!(str_arg(&a, "missing").is_err());
    }
}
