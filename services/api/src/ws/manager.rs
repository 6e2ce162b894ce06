//! Registry of live sessions and the liveness sweep.

use super::connector::{HandshakeError, Upstream};
use super::transport::{ClientOutbox, Probe, Transport};
use crate::models::SessionSummary;
use buddy_core::LocationState;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("AI service unavailable: {0}")]
    UpstreamUnavailable(#[from] HandshakeError),
}

/// What the registry keeps about the client side of a session.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    pub outbox: ClientOutbox,
    /// Set by every inbound client frame, cleared by each sweep.
    pub alive: Arc<AtomicBool>,
    /// Cancelling tears the whole session down.
    pub cancel: CancellationToken,
}

struct SessionEntry {
    created_at: DateTime<Utc>,
    client: ClientHandle,
}

/// A registered session and its freshly opened backend connection.
pub struct Registration {
    pub id: Uuid,
    pub backend: Transport,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

/// Thread-safe session registry.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the backend connection and, only if that succeeds, registers
    /// the session. Nothing is left in the registry on failure.
    pub async fn register(
        &self,
        upstream: &dyn Upstream,
        client: ClientHandle,
        location: &LocationState,
    ) -> Result<Registration, SessionError> {
        let backend = upstream.open(location).await?;

        let id = Uuid::new_v4();
        self.sessions.write().await.insert(
            id,
            SessionEntry {
                created_at: Utc::now(),
                client,
            },
        );
        debug!(session_id = %id, "Session registered.");
        Ok(Registration { id, backend })
    }

    /// Removes a session. Returns whether it was still registered.
    pub async fn deregister(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            debug!(session_id = %id, "Session deregistered.");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    /// Active sessions, oldest first.
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| SessionSummary {
                id: *id,
                created_at: entry.created_at,
                alive: entry.client.alive.load(Ordering::Acquire),
            })
            .collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// One liveness pass.
    ///
    /// A session is evicted when nothing arrived from its client since the
    /// previous pass, or when its client writer is gone. Survivors get their
    /// flag cleared and a ping queued. Eviction cancels the session, which
    /// closes both of its connections.
    pub async fn sweep(&self) -> SweepReport {
        let snapshot: Vec<(Uuid, ClientHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.client.clone()))
            .collect();

        let mut report = SweepReport::default();
        for (id, client) in snapshot {
            let was_alive = client.alive.swap(false, Ordering::AcqRel);
            let reachable = was_alive && {
                report.probed += 1;
                client.outbox.probe() != Probe::Gone
            };

            if !reachable {
                warn!(session_id = %id, was_alive, "Evicting unresponsive session.");
                client.cancel.cancel();
                if self.deregister(id).await {
                    report.evicted += 1;
                }
            }
        }
        report
    }

    /// Runs [`sweep`](Self::sweep) every `period` until `shutdown` fires.
    pub fn spawn_sweeper(&self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = manager.sweep().await;
                        let active = manager.len().await;
                        info!(probed = report.probed, evicted = report.evicted, active, "Liveness sweep done.");
                    }
                }
            }
            info!("Liveness sweeper stopped.");
        })
    }
}
