use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use colloquy_core::domain::repository::memory::{
    MemoryFlowFileStorage, MemoryKeyValueStore, MemorySessionRepository,
};
use colloquy_core::{
    BotId, DialogEngine, DialogEvent, EngineConfig, FlowDefinition, FlowFileStorage,
    FlowRepository, NodeDefinition, SessionId, StrategyMap, TurnOutcome,
};
use colloquy_flows::{
    FlowHooks, FlowInvalidation, FlowStore, FlowStoreConfig, FlowStoreError, FsFlowStorage,
    ManualClock, ModificationKind,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const MAIN_FLOW: &str = r#"{
  "version": "0.0.1",
  "startNode": "entry",
  "nodes": [
    { "id": "n1", "name": "entry", "onEnter": [], "onReceive": null, "next": [{ "condition": "true", "node": "bye" }] },
    { "id": "n2", "name": "bye", "onEnter": ["say #text text=bye"], "onReceive": null, "next": [] }
  ]
}"#;

const MAIN_LAYOUT: &str = r#"{
  "nodes": [{ "id": "n1", "position": { "x": 120, "y": 80 } }],
  "links": [{ "source": "n1", "target": "n2" }]
}"#;

#[derive(Default)]
struct RecordingHooks {
    events: Mutex<Vec<String>>,
}

impl RecordingHooks {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlowHooks for RecordingHooks {
    async fn on_flow_changed(&self, _bot_id: &BotId, flow: &FlowDefinition) {
        self.events.lock().unwrap().push(format!("changed {}", flow.name));
    }

    async fn on_flow_renamed(&self, _bot_id: &BotId, from: &str, to: &str) {
        self.events.lock().unwrap().push(format!("renamed {} {}", from, to));
    }

    async fn on_flow_deleted(&self, _bot_id: &BotId, name: &str) {
        self.events.lock().unwrap().push(format!("deleted {}", name));
    }
}

struct Harness {
    store: Arc<FlowStore>,
    storage: MemoryFlowFileStorage,
    clock: Arc<ManualClock>,
    hooks: Arc<RecordingHooks>,
}

fn bot() -> BotId {
    BotId("bot-1".to_string())
}

async fn harness() -> Harness {
    let storage = MemoryFlowFileStorage::new();
    storage.upsert(&bot(), "flows", "main.flow.json", MAIN_FLOW).await.unwrap();
    storage.upsert(&bot(), "flows", "main.ui.json", MAIN_LAYOUT).await.unwrap();

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
    ));
    let hooks = Arc::new(RecordingHooks::default());
    let store = FlowStore::new(
        Arc::new(storage.clone()),
        Arc::new(MemoryKeyValueStore::new()),
        FlowStoreConfig::default(),
    )
    .with_clock(clock.clone())
    .with_hooks(hooks.clone());

    Harness {
        store: Arc::new(store),
        storage,
        clock,
        hooks,
    }
}

fn new_flow(name: &str) -> FlowDefinition {
    FlowDefinition::new(name, NodeDefinition::new("start"))
}

#[tokio::test]
async fn test_load_all_merges_layout() {
    let h = harness().await;

    let flows = h.store.load_all(&bot()).await.unwrap();

    assert_eq!(flows.len(), 1);
    let main = &flows[0];
    assert_eq!(main.name, "main.flow.json");
    assert_eq!((main.nodes[0].x, main.nodes[0].y), (Some(120.0), Some(80.0)));
    assert_eq!((main.nodes[1].x, main.nodes[1].y), (Some(50.0), Some(330.0)));
    assert_eq!(main.links.len(), 1);
    assert_eq!(main.current_mutex, None);
}

#[tokio::test]
async fn test_cache_serves_until_invalidated() {
    let h = harness().await;
    h.store.load_all(&bot()).await.unwrap();

    let edited = MAIN_FLOW.replace("\"0.0.1\"", "\"0.0.2\"");
    h.storage.upsert(&bot(), "flows", "main.flow.json", &edited).await.unwrap();
    assert_eq!(h.store.load_all(&bot()).await.unwrap()[0].version, "0.0.1");

    // A layout change reloads its flow.
    h.store.handle_invalidated_file(&bot(), "main.ui.json").await.unwrap();
    assert_eq!(h.store.load_all(&bot()).await.unwrap()[0].version, "0.0.2");

    h.storage.delete(&bot(), "flows", "main.flow.json").await.unwrap();
    h.store.handle_invalidated_file(&bot(), "main.flow.json").await.unwrap();
    assert!(h.store.load_all(&bot()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalidation_listener() {
    let h = harness().await;
    h.store.load_all(&bot()).await.unwrap();

    let help = r#"{ "startNode": "start", "nodes": [{ "name": "start" }] }"#;
    h.storage.upsert(&bot(), "flows", "help.flow.json", help).await.unwrap();

    let (sender, receiver) = mpsc::channel(8);
    let listener = h.store.clone().spawn_invalidation_listener(receiver);
    sender
        .send(FlowInvalidation {
            bot_id: bot(),
            file: "help.flow.json".to_string(),
        })
        .await
        .unwrap();
    drop(sender);
    listener.await.unwrap();

    let names: Vec<String> = h
        .store
        .load_all(&bot())
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["help.flow.json", "main.flow.json"]);
}

#[tokio::test]
async fn test_invalid_flow_is_rejected() {
    let h = harness().await;
    let broken = r#"{ "startNode": "missing", "nodes": [{ "name": "start" }] }"#;
    h.storage.upsert(&bot(), "flows", "broken.flow.json", broken).await.unwrap();

    let result = h.store.load_all(&bot()).await;

    assert!(matches!(result, Err(FlowStoreError::InvalidFlow { ref file, .. }) if file == "broken.flow.json"));
}

#[tokio::test]
async fn test_insert_writes_files_and_notifies() {
    let h = harness().await;
    h.store.load_all(&bot()).await.unwrap();
    let mut changes = h.store.subscribe();

    let saved = h.store.insert_flow(&bot(), new_flow("help"), "ada").await.unwrap();

    assert_eq!(saved.name, "help.flow.json");
    assert_eq!(saved.current_mutex.as_ref().map(|m| m.last_modified_by.as_str()), Some("ada"));
    assert!(h.storage.exists(&bot(), "flows", "help.flow.json").await.unwrap());
    assert!(h.storage.exists(&bot(), "flows", "help.ui.json").await.unwrap());
    assert_eq!(h.store.load_all(&bot()).await.unwrap().len(), 2);

    let change = changes.recv().await.unwrap();
    assert_eq!(change.modification, ModificationKind::Create);
    assert_eq!(change.name, "help.flow.json");
    assert_eq!(change.editor, "ada");

    let again = h.store.insert_flow(&bot(), new_flow("help"), "ada").await;
    assert!(matches!(again, Err(FlowStoreError::AlreadyExists(_))));
}

#[tokio::test]
async fn test_update_respects_locks() {
    let h = harness().await;
    let mut main = h.store.load_all(&bot()).await.unwrap().remove(0);
    main.label = Some("Main".to_string());

    h.store.update_flow(&bot(), main.clone(), "ada").await.unwrap();
    assert_eq!(h.hooks.events(), vec!["changed main.flow.json".to_string()]);

    h.clock.advance(chrono::Duration::seconds(10));
    let denied = h.store.update_flow(&bot(), main.clone(), "grace").await;
    assert!(matches!(denied, Err(FlowStoreError::Locked { .. })));

    h.clock.advance(chrono::Duration::seconds(21));
    let saved = h.store.update_flow(&bot(), main, "grace").await.unwrap();
    assert_eq!(saved.current_mutex.map(|m| m.last_modified_by), Some("grace".to_string()));

    let stored = h.storage.read(&bot(), "flows", "main.flow.json").await.unwrap().unwrap();
    assert!(stored.contains("\"label\": \"Main\""));
    assert!(!stored.contains("currentMutex"));
}

#[tokio::test]
async fn test_rename_and_delete() {
    let h = harness().await;
    h.store.load_all(&bot()).await.unwrap();
    let mut changes = h.store.subscribe();

    h.store.rename_flow(&bot(), "main", "welcome", "ada").await.unwrap();
    assert!(h.storage.exists(&bot(), "flows", "welcome.flow.json").await.unwrap());
    assert!(h.storage.exists(&bot(), "flows", "welcome.ui.json").await.unwrap());
    assert!(!h.storage.exists(&bot(), "flows", "main.ui.json").await.unwrap());
    assert_eq!(h.store.load_all(&bot()).await.unwrap()[0].name, "welcome.flow.json");

    let rename = changes.recv().await.unwrap();
    assert_eq!(rename.modification, ModificationKind::Rename);
    assert_eq!(rename.new_name.as_deref(), Some("welcome.flow.json"));

    h.store.delete_flow(&bot(), "welcome.flow.json", "ada").await.unwrap();
    assert!(h.store.load_all(&bot()).await.unwrap().is_empty());
    assert!(!h.storage.exists(&bot(), "flows", "welcome.ui.json").await.unwrap());
    assert_eq!(changes.recv().await.unwrap().modification, ModificationKind::Delete);

    assert_eq!(
        h.hooks.events(),
        vec![
            "renamed main.flow.json welcome.flow.json".to_string(),
            "deleted welcome.flow.json".to_string()
        ]
    );

    let missing = h.store.delete_flow(&bot(), "welcome", "ada").await;
    assert!(matches!(missing, Err(FlowStoreError::NotFound(_))));
    let missing = h.store.rename_flow(&bot(), "welcome", "other", "ada").await;
    assert!(matches!(missing, Err(FlowStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_main_flow_on_disk_drives_the_engine() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(FlowStore::new(
        Arc::new(FsFlowStorage::new(root.path())),
        Arc::new(MemoryKeyValueStore::new()),
        FlowStoreConfig::default(),
    ));

    let main = store.create_main_flow(&bot()).await.unwrap();
    assert_eq!(main.name, "main.flow.json");
    assert_eq!(main.start_node, "entry");
    assert!(root.path().join("bots/bot-1/flows/main.ui.json").is_file());

    // A fresh store parses what the first one wrote.
    let reloaded = FlowStore::new(
        Arc::new(FsFlowStorage::new(root.path())),
        Arc::new(MemoryKeyValueStore::new()),
        FlowStoreConfig::default(),
    );
    let flows = FlowRepository::load_all(&reloaded, &bot()).await.unwrap();
    assert_eq!(flows[0].nodes[0].x, Some(100.0));

    let engine = DialogEngine::new(
        store,
        Arc::new(MemorySessionRepository::new()),
        StrategyMap::new(),
        EngineConfig::default(),
    );
    let outcome = engine
        .process_event(
            &SessionId("s1".to_string()),
            DialogEvent::text(bot(), "web", "user", "hi"),
        )
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Terminated);
}

#[tokio::test]
async fn test_flows_in_subdirectories_survive_a_restart() {
    let root = tempfile::tempdir().unwrap();
    let store = FlowStore::new(
        Arc::new(FsFlowStorage::new(root.path())),
        Arc::new(MemoryKeyValueStore::new()),
        FlowStoreConfig::default(),
    );
    store.create_main_flow(&bot()).await.unwrap();
    store
        .insert_flow(&bot(), new_flow("skills/help"), "ada")
        .await
        .unwrap();
    assert!(root.path().join("bots/bot-1/flows/skills/help.flow.json").is_file());

    let reloaded = FlowStore::new(
        Arc::new(FsFlowStorage::new(root.path())),
        Arc::new(MemoryKeyValueStore::new()),
        FlowStoreConfig::default(),
    );
    let names: Vec<String> = reloaded
        .load_all(&bot())
        .await
        .unwrap()
        .into_iter()
        .map(|flow| flow.name)
        .collect();
    assert_eq!(names, vec!["main.flow.json", "skills/help.flow.json"]);
}
