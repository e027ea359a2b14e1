use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use super::context::RequestContext;
use super::reply::Reply;
use crate::error::{CommandError, KeyturnError};

pub type CommandResult = Result<Reply, CommandError>;

/// A batch command: receives its own command object and the batch-wide context.
pub type CommandFn =
    for<'a> fn(&'a Map<String, Value>, &'a mut RequestContext) -> BoxFuture<'a, CommandResult>;

/// Name → handler table. Filled once at startup by each feature module, then
/// shared read-only by every request.
#[derive(Clone)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandFn>,
}

impl CommandRegistry {
    /// Registry holding only the built-in `debug` command.
    pub fn new() -> Self {
        let mut commands = HashMap::new();
        commands.insert("debug".to_string(), debug as CommandFn);
        Self { commands }
    }

    pub fn register(&mut self, name: &str, command: CommandFn) -> Result<(), KeyturnError> {
        match self.commands.entry(name.to_string()) {
            Entry::Occupied(_) => Err(KeyturnError::DuplicateCommand(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(command);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<CommandFn> {
        self.commands.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns on debug detail for the rest of the batch.
fn debug<'a>(_: &'a Map<String, Value>, ctx: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
    ctx.debug = true;
    Box::pin(async { Ok(Reply::ok()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop<'a>(_: &'a Map<String, Value>, _: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
        Box::pin(async { Ok(Reply::ok()) })
    }

    #[test]
    fn debug_is_builtin() {
        let reg = CommandRegistry::new();
        assert!(reg.get("debug").is_some());
        assert!(reg.get("acct_create").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn names_register_exactly_once() {
        let mut reg = CommandRegistry::new();
        reg.register("noop", noop).unwrap();
        assert!(matches!(
            reg.register("noop", noop),
            Err(KeyturnError::DuplicateCommand(name)) if name == "noop"
        ));
        assert!(matches!(
            reg.register("debug", noop),
            Err(KeyturnError::DuplicateCommand(_))
        ));
        assert_eq!(reg.len(), 2);
    }
}
