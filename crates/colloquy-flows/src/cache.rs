use colloquy_core::FlowDefinition;
use tokio::sync::RwLock;

/// Parsed flows of one bot.
///
/// The cache starts empty and is initialized by the first full load.
/// Single-flow changes only apply to an initialized cache; an empty one
/// is filled on the next load anyway.
#[derive(Debug, Default)]
pub struct BotFlows {
    flows: RwLock<Option<Vec<FlowDefinition>>>,
}

impl BotFlows {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the cached flows, `None` before initialization
    pub async fn snapshot(&self) -> Option<Vec<FlowDefinition>> {
        self.flows.read().await.clone()
    }

    /// Whether a full load has happened
    pub async fn is_initialized(&self) -> bool {
        self.flows.read().await.is_some()
    }

    /// Replace the cached flows
    pub async fn initialize(&self, flows: Vec<FlowDefinition>) {
        *self.flows.write().await = Some(flows);
    }

    /// Insert or replace one flow, keeping the list sorted by name
    pub async fn upsert(&self, flow: FlowDefinition) {
        let mut guard = self.flows.write().await;
        let Some(flows) = guard.as_mut() else {
            return;
        };

        match flows.iter_mut().find(|f| f.name == flow.name) {
            Some(existing) => *existing = flow,
            None => {
                flows.push(flow);
                flows.sort_by(|a, b| a.name.cmp(&b.name));
            }
        }
    }

    /// Drop one flow
    pub async fn remove(&self, name: &str) {
        if let Some(flows) = self.flows.write().await.as_mut() {
            flows.retain(|f| f.name != name);
        }
    }

    /// Rename one flow
    pub async fn rename(&self, from: &str, to: &str) {
        if let Some(flows) = self.flows.write().await.as_mut() {
            if let Some(flow) = flows.iter_mut().find(|f| f.name == from) {
                flow.name = to.to_string();
            }
            flows.sort_by(|a, b| a.name.cmp(&b.name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::NodeDefinition;

    fn flow(name: &str) -> FlowDefinition {
        FlowDefinition::new(name, NodeDefinition::new("entry"))
    }

    fn names(flows: Option<Vec<FlowDefinition>>) -> Vec<String> {
        flows
            .unwrap_or_default()
            .into_iter()
            .map(|f| f.name)
            .collect()
    }

    #[tokio::test]
    async fn test_changes_ignored_until_initialized() {
        let cache = BotFlows::new();
        cache.upsert(flow("main")).await;
        assert!(!cache.is_initialized().await);
        assert_eq!(cache.snapshot().await, None);
    }

    #[tokio::test]
    async fn test_single_flow_changes() {
        let cache = BotFlows::new();
        cache.initialize(vec![flow("main"), flow("zeta")]).await;

        cache.upsert(flow("help")).await;
        assert_eq!(
            names(cache.snapshot().await),
            vec!["help.flow.json", "main.flow.json", "zeta.flow.json"]
        );

        let mut changed = flow("main");
        changed.label = Some("Main".to_string());
        cache.upsert(changed).await;
        let flows = cache.snapshot().await.unwrap();
        assert_eq!(flows[1].label.as_deref(), Some("Main"));
        assert_eq!(flows.len(), 3);

        cache.rename("zeta.flow.json", "alpha.flow.json").await;
        cache.remove("help.flow.json").await;
        assert_eq!(
            names(cache.snapshot().await),
            vec!["alpha.flow.json", "main.flow.json"]
        );
    }
}
