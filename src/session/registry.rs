use super::{PipelineServices, Session};
use crate::metrics::MetricsSnapshot;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Owns every live session, keyed by id.
///
/// The registry only maps ids to sessions; all per-session state lives in [`Session`].
/// Sessions idle for longer than the configured timeout are evicted, either by
/// [`SessionRegistry::spawn_sweeper`] or when a new session is created.
pub struct SessionRegistry {
    services: Arc<PipelineServices>,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    /// Wrap shared services in an empty registry.
    pub fn new(services: PipelineServices) -> Self {
        Self {
            services: Arc::new(services),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create and register a new empty session.
    pub async fn create(&self) -> Arc<Session> {
        self.evict_idle().await;
        let session = Arc::new(Session::new(Arc::clone(&self.services)));
        self.sessions
            .write()
            .await
            .insert(session.id(), Arc::clone(&session));
        tracing::info!(session = %session.id(), "Session created");
        session
    }

    /// Look up a session by id.
    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Remove a session; returns `false` if it did not exist.
    ///
    /// In-flight requests holding the session finish normally; its knowledge base is freed
    /// once they complete.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            tracing::info!(session = %id, "Session destroyed");
        }
        removed
    }

    /// Drop sessions idle for longer than the configured timeout; returns how many went.
    ///
    /// Sessions with an upload in progress are kept.
    pub async fn evict_idle(&self) -> usize {
        let limit = self.services.settings.session_idle_timeout;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = session.is_processing() || session.idle_for() <= limit;
            if !keep {
                tracing::info!(session = %id, idle = ?session.idle_for(), "Session expired");
            }
            keep
        });
        before - sessions.len()
    }

    /// Sweep idle sessions every `interval` until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.evict_idle().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "Swept idle sessions");
                }
            }
        })
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no sessions are live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Process-wide pipeline counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.services.metrics.snapshot()
    }
}
