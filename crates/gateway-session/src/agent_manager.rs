//! Registry of locally-running adapters owned by one Gateway Session
//! (§4.5, §4.6 "Ownership"). The Broker never holds a handle into this
//! map directly — it only knows agent ids and which gateway owns them.

use std::{collections::HashMap, sync::Arc};

use agentim_adapter::AgentAdapter;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct AgentManager {
    agents: RwLock<HashMap<String, Arc<dyn AgentAdapter>>>,
}

impl AgentManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, agent_id: String, adapter: Arc<dyn AgentAdapter>) {
        self.agents.write().await.insert(agent_id, adapter);
    }

    /// Removes and disposes the adapter, if present.
    pub async fn unregister(&self, agent_id: &str) {
        let adapter = self.agents.write().await.remove(agent_id);
        if let Some(adapter) = adapter {
            adapter.dispose().await;
        }
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<dyn AgentAdapter>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Disposes every registered adapter. Used on shutdown (§4.5).
    pub async fn dispose_all(&self) {
        let adapters: Vec<Arc<dyn AgentAdapter>> = self.agents.write().await.drain().map(|(_, adapter)| adapter).collect();
        for adapter in adapters {
            adapter.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentim_adapter::{AdapterEvents, AdapterError, TurnContext};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NoopAdapter {
        disposed: AtomicBool,
    }

    #[async_trait]
    impl AgentAdapter for NoopAdapter {
        async fn send_message(&self, _content: &str, _context: TurnContext) -> Result<AdapterEvents, AdapterError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }

        async fn stop(&self) {}

        async fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn register_then_unregister_disposes_and_removes() {
        let manager = AgentManager::new();
        let adapter = Arc::new(NoopAdapter { disposed: AtomicBool::new(false) });
        manager.register("a1".into(), adapter.clone()).await;
        assert_eq!(manager.count().await, 1);
        manager.unregister("a1").await;
        assert_eq!(manager.count().await, 0);
        assert!(adapter.disposed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dispose_all_empties_the_registry() {
        let manager = AgentManager::new();
        manager.register("a1".into(), Arc::new(NoopAdapter { disposed: AtomicBool::new(false) })).await;
        manager.register("a2".into(), Arc::new(NoopAdapter { disposed: AtomicBool::new(false) })).await;
        manager.dispose_all().await;
        assert_eq!(manager.count().await, 0);
    }
}
