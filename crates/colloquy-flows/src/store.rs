//! The flow store.
//!
//! Flows of a bot are parsed once from storage and then served from a
//! per-bot cache. Edits made through the store update the cache directly;
//! files changed behind its back are picked up one at a time through
//! invalidation notices.

use async_trait::async_trait;
use colloquy_core::domain::flow_definition::{canonical_flow_name, FLOW_SUFFIX};
use colloquy_core::{
    BotId, CoreError, FlowDefinition, FlowFileStorage, FlowMutex, FlowRepository, KeyValueStore,
    NodeDefinition,
};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::BotFlows;
use crate::config::FlowStoreConfig;
use crate::error::{FlowStoreError, FlowStoreResult};
use crate::hooks::{FlowHooks, FlowInvalidation, FlowModification, ModificationKind, NoopHooks};
use crate::layout::{apply_layout, flow_file_name, is_flow_related, ui_file_name, FlowLayout};
use crate::lock::{Clock, FlowLock, SystemClock};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Parses, caches and edits the flows of every bot
pub struct FlowStore {
    storage: Arc<dyn FlowFileStorage>,
    lock: FlowLock,
    hooks: Arc<dyn FlowHooks>,
    caches: DashMap<BotId, Arc<BotFlows>>,
    changes: broadcast::Sender<FlowModification>,
    config: FlowStoreConfig,
}

impl FlowStore {
    /// Create a store over `storage`, keeping locks in `kv`
    pub fn new(
        storage: Arc<dyn FlowFileStorage>,
        kv: Arc<dyn KeyValueStore>,
        config: FlowStoreConfig,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            storage,
            lock: FlowLock::new(kv, Arc::new(SystemClock), config.lock_ttl()),
            hooks: Arc::new(NoopHooks),
            caches: DashMap::new(),
            changes,
            config,
        }
    }

    /// Replace the edit hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn FlowHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the clock used for locks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.lock = self.lock.with_clock(clock);
        self
    }

    /// Store configuration
    pub fn config(&self) -> &FlowStoreConfig {
        &self.config
    }

    /// Subscribe to flow edits
    pub fn subscribe(&self) -> broadcast::Receiver<FlowModification> {
        self.changes.subscribe()
    }

    fn cache(&self, bot_id: &BotId) -> Arc<BotFlows> {
        self.caches.entry(bot_id.clone()).or_default().value().clone()
    }

    /// All flows of a bot, sorted by file name
    pub async fn load_all(&self, bot_id: &BotId) -> FlowStoreResult<Vec<FlowDefinition>> {
        let cache = self.cache(bot_id);
        if let Some(flows) = cache.snapshot().await {
            return Ok(flows);
        }

        let files = self
            .storage
            .list(bot_id, &self.config.flow_dir, FLOW_SUFFIX)
            .await?;

        let mut flows = Vec::with_capacity(files.len());
        for file in &files {
            flows.push(self.parse_flow(bot_id, file).await?);
        }

        info!(bot_id = %bot_id, count = flows.len(), "Flows loaded");
        cache.initialize(flows.clone()).await;
        Ok(flows)
    }

    /// Refresh the cache after a flow or layout file changed in storage.
    ///
    /// Only the affected flow is re-parsed, or evicted when its file is gone.
    pub async fn handle_invalidated_file(&self, bot_id: &BotId, file: &str) -> FlowStoreResult<()> {
        if !is_flow_related(file) {
            return Ok(());
        }

        let cache = self.cache(bot_id);
        if !cache.is_initialized().await {
            return Ok(());
        }

        let flow_file = flow_file_name(file);
        if self
            .storage
            .exists(bot_id, &self.config.flow_dir, &flow_file)
            .await?
        {
            let flow = self.parse_flow(bot_id, &flow_file).await?;
            cache.upsert(flow).await;
            debug!(bot_id = %bot_id, flow = %flow_file, "Flow reloaded");
        } else {
            cache.remove(&flow_file).await;
            debug!(bot_id = %bot_id, flow = %flow_file, "Flow evicted");
        }
        Ok(())
    }

    /// Consume invalidation notices until the sender side is dropped
    pub fn spawn_invalidation_listener(
        self: Arc<Self>,
        mut notices: mpsc::Receiver<FlowInvalidation>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                if let Err(e) = self
                    .handle_invalidated_file(&notice.bot_id, &notice.file)
                    .await
                {
                    error!(
                        bot_id = %notice.bot_id,
                        file = %notice.file,
                        "Error invalidating flow cache: {}",
                        e
                    );
                }
            }
            debug!("Flow invalidation channel closed");
        })
    }

    /// Acquire or refresh the editing lock on a flow
    pub async fn try_lock(
        &self,
        bot_id: &BotId,
        editor: &str,
        flow: &str,
    ) -> FlowStoreResult<FlowMutex> {
        self.lock
            .try_lock(bot_id, editor, &canonical_flow_name(flow))
            .await
    }

    /// Create a new flow; fails if one with the same name exists
    pub async fn insert_flow(
        &self,
        bot_id: &BotId,
        mut flow: FlowDefinition,
        editor: &str,
    ) -> FlowStoreResult<FlowDefinition> {
        flow.name = canonical_flow_name(&flow.name);
        if self
            .storage
            .exists(bot_id, &self.config.flow_dir, &flow.name)
            .await?
        {
            return Err(FlowStoreError::AlreadyExists(flow.name));
        }

        validate(&flow)?;
        self.write_files(bot_id, &flow).await?;
        flow.current_mutex = Some(self.lock.try_lock(bot_id, editor, &flow.name).await?);
        let flow = self.cache_saved(bot_id, flow).await;

        info!(bot_id = %bot_id, flow = %flow.name, editor = %editor, "Flow created");
        self.notify(FlowModification {
            bot_id: bot_id.clone(),
            name: flow.name.clone(),
            modification: ModificationKind::Create,
            editor: editor.to_string(),
            new_name: None,
            payload: Some(flow.clone()),
        });
        Ok(flow)
    }

    /// Save a flow; the editor must be able to take its lock
    pub async fn update_flow(
        &self,
        bot_id: &BotId,
        mut flow: FlowDefinition,
        editor: &str,
    ) -> FlowStoreResult<FlowDefinition> {
        flow.name = canonical_flow_name(&flow.name);
        let mutex = self.lock.try_lock(bot_id, editor, &flow.name).await?;

        validate(&flow)?;
        if self
            .storage
            .exists(bot_id, &self.config.flow_dir, &flow.name)
            .await?
        {
            self.hooks.on_flow_changed(bot_id, &flow).await;
        }
        self.write_files(bot_id, &flow).await?;
        flow.current_mutex = Some(mutex);
        let flow = self.cache_saved(bot_id, flow).await;

        debug!(bot_id = %bot_id, flow = %flow.name, editor = %editor, "Flow updated");
        self.notify(FlowModification {
            bot_id: bot_id.clone(),
            name: flow.name.clone(),
            modification: ModificationKind::Update,
            editor: editor.to_string(),
            new_name: None,
            payload: Some(flow.clone()),
        });
        Ok(flow)
    }

    /// Delete a flow and its layout
    pub async fn delete_flow(&self, bot_id: &BotId, name: &str, editor: &str) -> FlowStoreResult<()> {
        let name = canonical_flow_name(name);
        let dir = &self.config.flow_dir;
        if !self.storage.exists(bot_id, dir, &name).await? {
            return Err(FlowStoreError::NotFound(name));
        }

        self.cache(bot_id).remove(&name).await;
        self.storage.delete(bot_id, dir, &name).await?;
        self.storage.delete(bot_id, dir, &ui_file_name(&name)).await?;
        self.hooks.on_flow_deleted(bot_id, &name).await;

        info!(bot_id = %bot_id, flow = %name, editor = %editor, "Flow deleted");
        self.notify(FlowModification {
            bot_id: bot_id.clone(),
            name,
            modification: ModificationKind::Delete,
            editor: editor.to_string(),
            new_name: None,
            payload: None,
        });
        Ok(())
    }

    /// Rename a flow and its layout
    pub async fn rename_flow(
        &self,
        bot_id: &BotId,
        from: &str,
        to: &str,
        editor: &str,
    ) -> FlowStoreResult<()> {
        let from = canonical_flow_name(from);
        let to = canonical_flow_name(to);
        let dir = &self.config.flow_dir;

        if !self.storage.exists(bot_id, dir, &from).await? {
            return Err(FlowStoreError::NotFound(from));
        }
        if self.storage.exists(bot_id, dir, &to).await? {
            return Err(FlowStoreError::AlreadyExists(to));
        }

        self.cache(bot_id).rename(&from, &to).await;
        self.storage.rename(bot_id, dir, &from, &to).await?;
        let (ui_from, ui_to) = (ui_file_name(&from), ui_file_name(&to));
        if self.storage.exists(bot_id, dir, &ui_from).await? {
            self.storage.rename(bot_id, dir, &ui_from, &ui_to).await?;
        }
        self.hooks.on_flow_renamed(bot_id, &from, &to).await;

        info!(bot_id = %bot_id, from = %from, to = %to, editor = %editor, "Flow renamed");
        self.notify(FlowModification {
            bot_id: bot_id.clone(),
            name: from,
            modification: ModificationKind::Rename,
            editor: editor.to_string(),
            new_name: Some(to),
            payload: None,
        });
        Ok(())
    }

    /// Write the default `main.flow.json` with a single `entry` node
    pub async fn create_main_flow(&self, bot_id: &BotId) -> FlowStoreResult<FlowDefinition> {
        let mut entry = NodeDefinition::new("entry");
        entry.id = format!("{:06}", uuid::Uuid::new_v4().as_u128() % 1_000_000);
        entry.x = Some(100.0);
        entry.y = Some(100.0);

        let mut flow = FlowDefinition::new("main", entry);
        flow.version = "0.0".to_string();

        self.write_files(bot_id, &flow).await?;
        let flow = self.cache_saved(bot_id, flow).await;
        info!(bot_id = %bot_id, "Main flow created");
        Ok(flow)
    }

    async fn parse_flow(&self, bot_id: &BotId, file: &str) -> FlowStoreResult<FlowDefinition> {
        let dir = &self.config.flow_dir;
        let raw = self
            .storage
            .read(bot_id, dir, file)
            .await?
            .ok_or_else(|| FlowStoreError::NotFound(file.to_string()))?;

        let mut flow: FlowDefinition =
            serde_json::from_str(&raw).map_err(|e| invalid(file, e))?;
        flow.name = file.to_string();
        for node in flow.nodes.iter_mut().filter(|n| n.id.is_empty()) {
            node.id = node.name.clone();
        }
        flow.validate().map_err(|e| invalid(file, e))?;

        let layout = match self.storage.read(bot_id, dir, &ui_file_name(file)).await? {
            Some(raw) => Some(
                serde_json::from_str::<FlowLayout>(&raw)
                    .map_err(|e| invalid(&ui_file_name(file), e))?,
            ),
            None => None,
        };
        apply_layout(
            &mut flow,
            layout.as_ref(),
            self.config.placing_step,
            self.config.min_pos_x,
        );
        flow.current_mutex = self.lock.current(bot_id, file).await?;

        Ok(flow)
    }

    async fn write_files(&self, bot_id: &BotId, flow: &FlowDefinition) -> FlowStoreResult<()> {
        let dir = &self.config.flow_dir;
        let content = serde_json::to_string_pretty(&flow_file_content(flow)?)?;
        let layout = serde_json::to_string_pretty(&FlowLayout::from_flow(flow))?;

        self.storage.upsert(bot_id, dir, &flow.name, &content).await?;
        self.storage
            .upsert(bot_id, dir, &ui_file_name(&flow.name), &layout)
            .await?;
        Ok(())
    }

    /// Put a just-saved flow in the cache, placed the way a re-parse would place it
    async fn cache_saved(&self, bot_id: &BotId, mut flow: FlowDefinition) -> FlowDefinition {
        let layout = FlowLayout::from_flow(&flow);
        apply_layout(
            &mut flow,
            Some(&layout),
            self.config.placing_step,
            self.config.min_pos_x,
        );
        self.cache(bot_id).upsert(flow.clone()).await;
        flow
    }

    fn notify(&self, modification: FlowModification) {
        if self.changes.send(modification).is_err() {
            debug!("No listeners for flow changes");
        }
    }
}

#[async_trait]
impl FlowRepository for FlowStore {
    async fn load_all(&self, bot_id: &BotId) -> Result<Vec<FlowDefinition>, CoreError> {
        FlowStore::load_all(self, bot_id).await.map_err(CoreError::from)
    }
}

fn validate(flow: &FlowDefinition) -> FlowStoreResult<()> {
    flow.validate().map_err(|e| invalid(&flow.name, e))
}

fn invalid(file: &str, reason: impl std::fmt::Display) -> FlowStoreError {
    FlowStoreError::InvalidFlow {
        file: file.to_string(),
        reason: reason.to_string(),
    }
}

/// The `.flow.json` document: the flow without its name, layout and lock
fn flow_file_content(flow: &FlowDefinition) -> FlowStoreResult<Value> {
    let mut value = serde_json::to_value(flow)?;
    if let Value::Object(map) = &mut value {
        map.remove("name");
        map.remove("links");
        map.remove("currentMutex");
        if let Some(Value::Array(nodes)) = map.get_mut("nodes") {
            for node in nodes.iter_mut() {
                if let Value::Object(node) = node {
                    node.remove("x");
                    node.remove("y");
                }
            }
        }
    }
    Ok(value)
}
