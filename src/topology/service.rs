//! Periodic topology reconciliation service
//!
//! Runs on its own timer, decoupled from round progression. Failures are
//! logged and retried on the next tick; a missing final node is normal
//! before admin setup and only logged at debug level.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::topology::TopologyManager;
use crate::types::HivemindError;

/// Background service driving [`TopologyManager::reconcile`] on a timer
pub struct TopologyService {
    manager: Arc<TopologyManager>,
    interval: Duration,
    /// Whether the service loop is running
    running: Arc<RwLock<bool>>,
}

impl TopologyService {
    /// Create a new service; call [`start`](Self::start) to begin ticking
    pub fn new(manager: Arc<TopologyManager>, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the reconciliation loop
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Topology service already running");
                return;
            }
            *running = true;
        }

        info!(
            "Starting topology service (interval: {:?})",
            self.interval
        );

        let service = Arc::clone(&self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.interval);
            // A slow reconcile must not stack ticks behind it
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if !*service.running.read().await {
                    info!("Topology service stopped");
                    break;
                }

                match service.manager.reconcile().await {
                    Ok(report) if report.edges_added + report.edges_removed > 0 => {
                        debug!(
                            "Topology tick applied {} add(s), {} removal(s)",
                            report.edges_added, report.edges_removed
                        );
                    }
                    Ok(_) => {}
                    Err(HivemindError::NotFound(reason)) => {
                        debug!("Topology tick skipped: {}", reason);
                    }
                    Err(e) => {
                        error!("Topology reconciliation failed (will retry): {}", e);
                    }
                }
            }
        });
    }

    /// Stop the service after the current tick
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Stopping topology service");
    }

    /// Check if the service is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ParticipantDoc;
    use crate::store::{GameStore, MemoryStore};
    use crate::types::Group;

    #[tokio::test]
    async fn test_start_and_stop() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_participant(ParticipantDoc::new(
                "final".into(),
                Group::FinalNode,
                true,
                "x".into(),
            ))
            .await
            .unwrap();

        let manager = Arc::new(TopologyManager::new(store as Arc<dyn GameStore>, 2));
        let service = Arc::new(TopologyService::new(manager, Duration::from_secs(5)));

        Arc::clone(&service).start().await;
        assert!(service.is_running().await);

        service.stop().await;
        assert!(!service.is_running().await);
    }
}
