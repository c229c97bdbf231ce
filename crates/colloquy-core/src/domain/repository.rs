//! Repository traits for Colloquy Core
//!
//! This module defines the persistence contracts used by the dialog engine
//! and the flow store. External crates can implement these traits to
//! provide different persistence mechanisms. Every implementation must give
//! read-after-write consistency for a single key.

use async_trait::async_trait;
use serde_json::Value;

use super::flow_definition::FlowDefinition;
use super::session::{BotId, DialogSession, SessionId};
use crate::CoreError;

/// Repository for dialog sessions
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Find a session by id
    async fn get(&self, id: &SessionId) -> Result<Option<DialogSession>, CoreError>;

    /// Store a new session
    async fn create(&self, session: &DialogSession) -> Result<(), CoreError>;

    /// Overwrite an existing session
    async fn update(&self, session: &DialogSession) -> Result<(), CoreError>;

    /// Delete a session; deleting a missing session is not an error
    async fn delete(&self, id: &SessionId) -> Result<(), CoreError>;
}

/// Read access to the parsed flows of a bot
#[async_trait]
pub trait FlowRepository: Send + Sync {
    /// All flows of a bot
    async fn load_all(&self, bot_id: &BotId) -> Result<Vec<FlowDefinition>, CoreError>;
}

/// Shared key/value store, scoped per bot
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, bot_id: &BotId, key: &str) -> Result<Option<Value>, CoreError>;

    /// Write a value
    async fn set(&self, bot_id: &BotId, key: &str, value: Value) -> Result<(), CoreError>;

    /// Remove a value
    async fn delete(&self, bot_id: &BotId, key: &str) -> Result<(), CoreError>;
}

/// Raw storage of flow and layout files, addressed by bot, directory and file name
#[async_trait]
pub trait FlowFileStorage: Send + Sync {
    /// Read a file, `None` when it does not exist
    async fn read(&self, bot_id: &BotId, dir: &str, file: &str)
        -> Result<Option<String>, CoreError>;

    /// Create or replace a file
    async fn upsert(
        &self,
        bot_id: &BotId,
        dir: &str,
        file: &str,
        content: &str,
    ) -> Result<(), CoreError>;

    /// Delete a file; deleting a missing file is not an error
    async fn delete(&self, bot_id: &BotId, dir: &str, file: &str) -> Result<(), CoreError>;

    /// Rename a file
    async fn rename(&self, bot_id: &BotId, dir: &str, from: &str, to: &str)
        -> Result<(), CoreError>;

    /// Whether a file exists
    async fn exists(&self, bot_id: &BotId, dir: &str, file: &str) -> Result<bool, CoreError>;

    /// Paths ending with `suffix` under a directory and its subdirectories,
    /// relative to it with `/` separators, sorted
    async fn list(&self, bot_id: &BotId, dir: &str, suffix: &str)
        -> Result<Vec<String>, CoreError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::Arc;

    /// In-memory session repository backed by a concurrent map
    #[derive(Clone, Default)]
    pub struct MemorySessionRepository {
        sessions: Arc<DashMap<String, DialogSession>>,
    }

    impl MemorySessionRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of stored sessions
        pub fn len(&self) -> usize {
            self.sessions.len()
        }

        /// Whether no session is stored
        pub fn is_empty(&self) -> bool {
            self.sessions.is_empty()
        }
    }

    #[async_trait]
    impl SessionRepository for MemorySessionRepository {
        async fn get(&self, id: &SessionId) -> Result<Option<DialogSession>, CoreError> {
            Ok(self.sessions.get(&id.0).map(|s| s.clone()))
        }

        async fn create(&self, session: &DialogSession) -> Result<(), CoreError> {
            if self.sessions.contains_key(&session.id.0) {
                return Err(CoreError::StateStoreError(format!(
                    "Session already exists: {}",
                    session.id
                )));
            }
            self.sessions.insert(session.id.0.clone(), session.clone());
            Ok(())
        }

        async fn update(&self, session: &DialogSession) -> Result<(), CoreError> {
            let mut stored = session.clone();
            stored.touch();
            self.sessions.insert(session.id.0.clone(), stored);
            Ok(())
        }

        async fn delete(&self, id: &SessionId) -> Result<(), CoreError> {
            self.sessions.remove(&id.0);
            Ok(())
        }
    }

    /// In-memory flow repository, flows are registered per bot
    #[derive(Clone, Default)]
    pub struct MemoryFlowRepository {
        flows: Arc<DashMap<String, Vec<FlowDefinition>>>,
    }

    impl MemoryFlowRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }

        /// Repository holding `flows` for `bot_id`
        pub fn with_flows(bot_id: &BotId, flows: Vec<FlowDefinition>) -> Self {
            let repo = Self::new();
            repo.set_flows(bot_id, flows);
            repo
        }

        /// Replace the flows of a bot
        pub fn set_flows(&self, bot_id: &BotId, flows: Vec<FlowDefinition>) {
            self.flows.insert(bot_id.0.clone(), flows);
        }
    }

    #[async_trait]
    impl FlowRepository for MemoryFlowRepository {
        async fn load_all(&self, bot_id: &BotId) -> Result<Vec<FlowDefinition>, CoreError> {
            Ok(self
                .flows
                .get(&bot_id.0)
                .map(|f| f.clone())
                .unwrap_or_default())
        }
    }

    /// In-memory key/value store
    #[derive(Clone, Default)]
    pub struct MemoryKeyValueStore {
        values: Arc<DashMap<(String, String), Value>>,
    }

    impl MemoryKeyValueStore {
        /// Create an empty store
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl KeyValueStore for MemoryKeyValueStore {
        async fn get(&self, bot_id: &BotId, key: &str) -> Result<Option<Value>, CoreError> {
            Ok(self
                .values
                .get(&(bot_id.0.clone(), key.to_string()))
                .map(|v| v.clone()))
        }

        async fn set(&self, bot_id: &BotId, key: &str, value: Value) -> Result<(), CoreError> {
            self.values.insert((bot_id.0.clone(), key.to_string()), value);
            Ok(())
        }

        async fn delete(&self, bot_id: &BotId, key: &str) -> Result<(), CoreError> {
            self.values.remove(&(bot_id.0.clone(), key.to_string()));
            Ok(())
        }
    }

    /// In-memory flow file storage keyed by `bot/dir/file`
    #[derive(Clone, Default)]
    pub struct MemoryFlowFileStorage {
        files: Arc<DashMap<String, String>>,
    }

    impl MemoryFlowFileStorage {
        /// Create an empty storage
        pub fn new() -> Self {
            Self::default()
        }

        fn key(bot_id: &BotId, dir: &str, file: &str) -> String {
            format!("{}/{}/{}", bot_id.0, dir, file)
        }
    }

    #[async_trait]
    impl FlowFileStorage for MemoryFlowFileStorage {
        async fn read(
            &self,
            bot_id: &BotId,
            dir: &str,
            file: &str,
        ) -> Result<Option<String>, CoreError> {
            Ok(self
                .files
                .get(&Self::key(bot_id, dir, file))
                .map(|c| c.clone()))
        }

        async fn upsert(
            &self,
            bot_id: &BotId,
            dir: &str,
            file: &str,
            content: &str,
        ) -> Result<(), CoreError> {
            self.files
                .insert(Self::key(bot_id, dir, file), content.to_string());
            Ok(())
        }

        async fn delete(&self, bot_id: &BotId, dir: &str, file: &str) -> Result<(), CoreError> {
            self.files.remove(&Self::key(bot_id, dir, file));
            Ok(())
        }

        async fn rename(
            &self,
            bot_id: &BotId,
            dir: &str,
            from: &str,
            to: &str,
        ) -> Result<(), CoreError> {
            let (_, content) = self
                .files
                .remove(&Self::key(bot_id, dir, from))
                .ok_or_else(|| CoreError::IOError(format!("File not found: {}/{}", dir, from)))?;
            self.files.insert(Self::key(bot_id, dir, to), content);
            Ok(())
        }

        async fn exists(&self, bot_id: &BotId, dir: &str, file: &str) -> Result<bool, CoreError> {
            Ok(self.files.contains_key(&Self::key(bot_id, dir, file)))
        }

        async fn list(
            &self,
            bot_id: &BotId,
            dir: &str,
            suffix: &str,
        ) -> Result<Vec<String>, CoreError> {
            let prefix = format!("{}/{}/", bot_id.0, dir);
            let mut names: Vec<String> = self
                .files
                .iter()
                .filter_map(|entry| {
                    entry
                        .key()
                        .strip_prefix(&prefix)
                        .filter(|name| name.ends_with(suffix))
                        .map(str::to_string)
                })
                .collect();
            names.sort();
            Ok(names)
        }
    }
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::memory::*;
    use super::*;
    use crate::domain::session::DialogContext;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_session_lifecycle() {
        let repo = MemorySessionRepository::new();
        let id = SessionId("s1".to_string());
        let session = DialogSession::new(
            id.clone(),
            BotId("bot".to_string()),
            DialogContext::at("main.flow.json", "entry"),
        );

        repo.create(&session).await.unwrap();
        assert!(repo.create(&session).await.is_err());

        let mut stored = repo.get(&id).await.unwrap().unwrap();
        stored.context.queue = Some("[]".to_string());
        repo.update(&stored).await.unwrap();
        assert_eq!(
            repo.get(&id).await.unwrap().unwrap().context.queue.as_deref(),
            Some("[]")
        );

        repo.delete(&id).await.unwrap();
        assert!(repo.get(&id).await.unwrap().is_none());
        repo.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_kvs_is_scoped_per_bot() {
        let kvs = MemoryKeyValueStore::new();
        let a = BotId("a".to_string());
        let b = BotId("b".to_string());

        kvs.set(&a, "key", json!(1)).await.unwrap();
        assert_eq!(kvs.get(&a, "key").await.unwrap(), Some(json!(1)));
        assert_eq!(kvs.get(&b, "key").await.unwrap(), None);

        kvs.delete(&a, "key").await.unwrap();
        assert_eq!(kvs.get(&a, "key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_file_storage_list_and_rename() {
        let storage = MemoryFlowFileStorage::new();
        let bot = BotId("bot".to_string());

        storage.upsert(&bot, "flows", "b.flow.json", "{}").await.unwrap();
        storage.upsert(&bot, "flows", "a.flow.json", "{}").await.unwrap();
        storage.upsert(&bot, "flows", "a.ui.json", "{}").await.unwrap();
        storage.upsert(&bot, "flows", "sub/c.flow.json", "{}").await.unwrap();

        let listed = storage.list(&bot, "flows", ".flow.json").await.unwrap();
        assert_eq!(listed, vec!["a.flow.json", "b.flow.json", "sub/c.flow.json"]);

        storage.rename(&bot, "flows", "a.flow.json", "z.flow.json").await.unwrap();
        assert!(!storage.exists(&bot, "flows", "a.flow.json").await.unwrap());
        assert_eq!(
            storage.read(&bot, "flows", "z.flow.json").await.unwrap().as_deref(),
            Some("{}")
        );
        assert!(storage.rename(&bot, "flows", "nope", "x").await.is_err());
    }
}
