//! KeyValueStore trait definition.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;

use crate::error::{HealthStatus, StorageError, StorageResult};

/// Time as reported by the store itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerTime {
    pub seconds: i64,
    pub micros: u32,
}

impl ServerTime {
    /// Opaque string form used as a last-modified marker.
    pub fn marker(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.seconds, self.micros)
    }
}

/// A single command inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
    Rename { from: String, to: String },
    SetAdd { key: String, member: String },
    SetRemove { key: String, member: String },
    Time,
}

/// Reply to one [`Command`], in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    /// Whether the command changed anything (key deleted, member added/removed).
    Bool(bool),
    Time(ServerTime),
}

impl Reply {
    pub fn as_time(&self) -> Option<ServerTime> {
        match self {
            Reply::Time(t) => Some(*t),
            _ => None,
        }
    }
}

/// An ordered group of commands applied atomically by
/// [`KeyValueStore::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command and returns its reply index.
    pub fn push(&mut self, command: Command) -> usize {
        self.commands.push(command);
        self.commands.len() - 1
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) -> usize {
        self.push(Command::Set {
            key: key.into(),
            value,
        })
    }

    pub fn delete(&mut self, key: impl Into<String>) -> usize {
        self.push(Command::Delete { key: key.into() })
    }

    pub fn rename(&mut self, from: impl Into<String>, to: impl Into<String>) -> usize {
        self.push(Command::Rename {
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) -> usize {
        self.push(Command::SetAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn set_remove(&mut self, key: impl Into<String>, member: impl Into<String>) -> usize {
        self.push(Command::SetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn time(&mut self) -> usize {
        self.push(Command::Time)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Extracts the server time reply at `index`.
pub fn time_reply(replies: &[Reply], index: usize) -> StorageResult<ServerTime> {
    replies
        .get(index)
        .and_then(Reply::as_time)
        .ok_or_else(|| StorageError::InternalError {
            message: format!("expected time reply at index {index}"),
        })
}

/// Abstract key-value store holding byte values and string sets.
///
/// Implementations must be thread-safe (Send + Sync) and support
/// async operations. Value keys and set keys share one keyspace; a set
/// whose last member is removed no longer exists.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    // Value operations

    /// Gets a value, `None` if the key does not exist.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Sets a value, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Deletes a key of any kind. Returns whether it existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Atomically moves `from` to `to`, replacing `to`.
    ///
    /// Fails with [`StorageError::NoSuchKey`] if `from` does not exist.
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    // Set operations

    /// Adds a member. Returns whether it was newly added.
    async fn set_add(&self, key: &str, member: &str) -> StorageResult<bool>;

    /// Removes a member. Returns whether it was present.
    async fn set_remove(&self, key: &str, member: &str) -> StorageResult<bool>;

    async fn set_contains(&self, key: &str, member: &str) -> StorageResult<bool>;

    /// All members; empty if the set does not exist.
    async fn set_members(&self, key: &str) -> StorageResult<HashSet<String>>;

    // Store operations

    /// The store's own current time. Successive calls never go backwards.
    async fn time(&self) -> StorageResult<ServerTime>;

    /// Applies every command in `batch` as one atomic unit.
    ///
    /// Either all effects become visible together or, on error, none do.
    /// Returns one reply per command.
    async fn execute(&self, batch: Batch) -> StorageResult<Vec<Reply>>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;
}
