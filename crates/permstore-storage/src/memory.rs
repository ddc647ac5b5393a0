//! In-memory key-value store for testing and single-process deployments.
//!
//! Values and sets live in one `HashMap` behind a tokio `RwLock`, so a
//! batch holds the write lock for its whole duration and readers never
//! observe a half-applied batch. Failed batches are rolled back from an
//! undo log.
//!
//! The store also carries a few test hooks: it can be switched
//! unavailable, given artificial latency, and asked how many times a key
//! was read.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::{HealthStatus, StorageError, StorageResult};
use crate::traits::{Batch, Command, KeyValueStore, Reply, ServerTime};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Blob(Vec<u8>),
    Set(HashSet<String>),
}

type Keyspace = HashMap<String, Entry>;

/// Prior state of each key touched by a batch, in touch order.
type UndoLog = Vec<(String, Option<Entry>)>;

/// In-memory implementation of [`KeyValueStore`].
#[derive(Debug)]
pub struct MemoryKeyValueStore {
    data: RwLock<Keyspace>,
    available: AtomicBool,
    latency: Option<Duration>,
    /// Last issued time in microseconds since the epoch.
    last_time_micros: AtomicU64,
    operations: AtomicU64,
    reads: DashMap<String, u64>,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency: None,
            last_time_micros: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            reads: DashMap::new(),
        }
    }
}

impl MemoryKeyValueStore {
    /// Creates a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Delays every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// When `false`, every operation fails with a connection error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of operations issued against the store, including failed ones.
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Number of direct reads (`get`, `set_members`, `set_contains`) of `key`.
    pub fn read_count(&self, key: &str) -> u64 {
        self.reads.get(key).map(|c| *c).unwrap_or(0)
    }

    /// Whether `key` exists, without counting as a read.
    pub async fn contains_key(&self, key: &str) -> bool {
        self.data.read().await.contains_key(key)
    }

    /// All keys currently present, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn begin(&self) -> StorageResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.is_available() {
            return Err(StorageError::ConnectionError {
                message: "memory store marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn record_read(&self, key: &str) {
        *self.reads.entry(key.to_string()).or_insert(0) += 1;
    }

    fn next_time(&self) -> ServerTime {
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let previous = self
            .last_time_micros
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let issued = now.max(previous + 1);
        ServerTime {
            seconds: (issued / 1_000_000) as i64,
            micros: (issued % 1_000_000) as u32,
        }
    }

    fn apply(
        &self,
        data: &mut Keyspace,
        command: Command,
        undo: &mut UndoLog,
    ) -> StorageResult<Reply> {
        match command {
            Command::Set { key, value } => {
                remember(data, &key, undo);
                data.insert(key, Entry::Blob(value));
                Ok(Reply::Ok)
            }
            Command::Delete { key } => {
                remember(data, &key, undo);
                Ok(Reply::Bool(data.remove(&key).is_some()))
            }
            Command::Rename { from, to } => {
                if !data.contains_key(&from) {
                    return Err(StorageError::NoSuchKey { key: from });
                }
                remember(data, &from, undo);
                remember(data, &to, undo);
                if let Some(entry) = data.remove(&from) {
                    data.insert(to, entry);
                }
                Ok(Reply::Ok)
            }
            Command::SetAdd { key, member } => {
                if member_state(data, &key, &member)? == Some(true) {
                    return Ok(Reply::Bool(false));
                }
                remember(data, &key, undo);
                let added = match data
                    .entry(key)
                    .or_insert_with(|| Entry::Set(HashSet::new()))
                {
                    Entry::Set(members) => members.insert(member),
                    Entry::Blob(_) => false,
                };
                Ok(Reply::Bool(added))
            }
            Command::SetRemove { key, member } => {
                if member_state(data, &key, &member)? != Some(true) {
                    return Ok(Reply::Bool(false));
                }
                remember(data, &key, undo);
                let now_empty = match data.get_mut(&key) {
                    Some(Entry::Set(members)) => {
                        members.remove(&member);
                        members.is_empty()
                    }
                    _ => false,
                };
                if now_empty {
                    data.remove(&key);
                }
                Ok(Reply::Bool(true))
            }
            Command::Time => Ok(Reply::Time(self.next_time())),
        }
    }
}

/// `None` if the set does not exist, otherwise whether `member` is in it.
fn member_state(data: &Keyspace, key: &str, member: &str) -> StorageResult<Option<bool>> {
    match data.get(key) {
        None => Ok(None),
        Some(Entry::Set(members)) => Ok(Some(members.contains(member))),
        Some(Entry::Blob(_)) => Err(wrong_type(key, "set")),
    }
}

fn remember(data: &Keyspace, key: &str, undo: &mut UndoLog) {
    undo.push((key.to_string(), data.get(key).cloned()));
}

fn rollback(data: &mut Keyspace, undo: UndoLog) {
    for (key, prior) in undo.into_iter().rev() {
        match prior {
            Some(entry) => {
                data.insert(key, entry);
            }
            None => {
                data.remove(&key);
            }
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StorageError {
    StorageError::WrongType {
        key: key.to_string(),
        expected,
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.begin().await?;
        self.record_read(key);
        match self.data.read().await.get(key) {
            None => Ok(None),
            Some(Entry::Blob(value)) => Ok(Some(value.clone())),
            Some(Entry::Set(_)) => Err(wrong_type(key, "value")),
        }
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.begin().await?;
        self.data
            .write()
            .await
            .insert(key.to_string(), Entry::Blob(value));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.begin().await?;
        Ok(self.data.write().await.remove(key).is_some())
    }

    #[instrument(skip(self))]
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.begin().await?;
        let mut data = self.data.write().await;
        let entry = data.remove(from).ok_or_else(|| StorageError::NoSuchKey {
            key: from.to_string(),
        })?;
        data.insert(to.to_string(), entry);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_add(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.begin().await?;
        let mut data = self.data.write().await;
        let mut undo = UndoLog::new();
        let command = Command::SetAdd {
            key: key.to_string(),
            member: member.to_string(),
        };
        match self.apply(&mut data, command, &mut undo)? {
            Reply::Bool(added) => Ok(added),
            _ => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn set_remove(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.begin().await?;
        let mut data = self.data.write().await;
        let mut undo = UndoLog::new();
        let command = Command::SetRemove {
            key: key.to_string(),
            member: member.to_string(),
        };
        match self.apply(&mut data, command, &mut undo)? {
            Reply::Bool(removed) => Ok(removed),
            _ => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn set_contains(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.begin().await?;
        self.record_read(key);
        match self.data.read().await.get(key) {
            None => Ok(false),
            Some(Entry::Set(members)) => Ok(members.contains(member)),
            Some(Entry::Blob(_)) => Err(wrong_type(key, "set")),
        }
    }

    #[instrument(skip(self))]
    async fn set_members(&self, key: &str) -> StorageResult<HashSet<String>> {
        self.begin().await?;
        self.record_read(key);
        match self.data.read().await.get(key) {
            None => Ok(HashSet::new()),
            Some(Entry::Set(members)) => Ok(members.clone()),
            Some(Entry::Blob(_)) => Err(wrong_type(key, "set")),
        }
    }

    async fn time(&self) -> StorageResult<ServerTime> {
        self.begin().await?;
        Ok(self.next_time())
    }

    #[instrument(skip(self, batch), fields(commands = batch.len()))]
    async fn execute(&self, batch: Batch) -> StorageResult<Vec<Reply>> {
        self.begin().await?;
        let mut data = self.data.write().await;
        let mut undo = UndoLog::new();
        let mut replies = Vec::with_capacity(batch.len());

        for (index, command) in batch.into_commands().into_iter().enumerate() {
            match self.apply(&mut data, command, &mut undo) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    rollback(&mut data, undo);
                    return Err(StorageError::BatchFailed {
                        index,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(replies)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let start = Instant::now();
        self.begin().await?;
        let keys = self.data.read().await.len();
        Ok(HealthStatus {
            healthy: true,
            latency: start.elapsed(),
            message: Some(format!("memory store, {keys} keys")),
        })
    }
}
