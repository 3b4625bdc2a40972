//! Topology manager
//!
//! Keeps the prediction graph well-formed as membership changes:
//! Group One fans out to Group Two with a fixed number of outbound edges
//! per node, and every Group Two node feeds the final node. Repair is
//! incremental so learned weights on surviving edges are preserved; only
//! edges whose endpoints left their groups are dropped, and only missing
//! edges are created (at the neutral default weight).

mod service;

pub use service::TopologyService;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::db::schemas::ConnectionDoc;
use crate::store::GameStore;
use crate::types::{Group, HivemindError, Result};

/// Changes required to restore the graph invariants
#[derive(Debug, Default, PartialEq)]
pub struct TopologyPlan {
    /// (source, target) pairs to create at the default weight
    pub add: Vec<(String, String)>,
    /// Connection ids to remove
    pub remove: Vec<String>,
}

impl TopologyPlan {
    /// Whether the current graph already satisfies the invariants
    pub fn is_noop(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Summary of an applied reconciliation
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileReport {
    pub edges_added: usize,
    pub edges_removed: usize,
}

/// Compute the incremental repair plan for the connection graph.
///
/// Deterministic: identical inputs always produce the identical plan, so
/// a second reconciliation over an already-repaired graph is a no-op.
/// When the coverage invariant is infeasible (more Group Two nodes than
/// total fan-out capacity), the plan still converges instead of churning.
pub fn plan(
    group1: &[String],
    group2: &[String],
    final_node: &str,
    edges: &[ConnectionDoc],
    fan_out: usize,
) -> TopologyPlan {
    let g1: HashSet<&str> = group1.iter().map(String::as_str).collect();
    let g2: HashSet<&str> = group2.iter().map(String::as_str).collect();

    let mut plan = TopologyPlan::default();

    // Partition existing edges into valid and invalid. Valid edges are
    // kept untouched so their learned weights survive.
    let mut kept: Vec<&ConnectionDoc> = Vec::new();
    for edge in edges {
        let layer_edge = g1.contains(edge.source_id.as_str()) && g2.contains(edge.target_id.as_str());
        let sink_edge = g2.contains(edge.source_id.as_str()) && edge.target_id == final_node;
        if layer_edge || sink_edge {
            kept.push(edge);
        } else {
            plan.remove.push(edge.connection_id.clone());
        }
    }

    // Every Group Two node needs exactly one edge into the final node.
    for g2_id in group2 {
        let has_sink = kept
            .iter()
            .any(|e| e.source_id == *g2_id && e.target_id == final_node);
        if !has_sink {
            plan.add.push((g2_id.clone(), final_node.to_string()));
        }
    }

    // Inbound counts per Group Two node over the layer edges, maintained
    // as the plan trims and adds.
    let mut inbound: HashMap<String, usize> = group2.iter().map(|id| (id.clone(), 0)).collect();
    let mut outbound: HashMap<String, Vec<ConnectionDoc>> =
        group1.iter().map(|id| (id.clone(), Vec::new())).collect();
    for edge in &kept {
        if g2.contains(edge.target_id.as_str()) {
            if let Some(list) = outbound.get_mut(edge.source_id.as_str()) {
                list.push((*edge).clone());
                *inbound.entry(edge.target_id.clone()).or_default() += 1;
            }
        }
    }

    for g1_id in group1 {
        let mut current = outbound.remove(g1_id.as_str()).unwrap_or_default();

        // Trim surplus outbound edges, dropping the ones whose targets
        // are best covered by other sources first.
        while current.len() > fan_out {
            let idx = current
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    let ia = inbound.get(&a.target_id).copied().unwrap_or(0);
                    let ib = inbound.get(&b.target_id).copied().unwrap_or(0);
                    ia.cmp(&ib).then(a.target_id.cmp(&b.target_id))
                })
                .map(|(i, _)| i);
            let idx = match idx {
                Some(i) => i,
                None => break,
            };
            let dropped = current.remove(idx);
            plan.remove.push(dropped.connection_id.clone());
            if let Some(count) = inbound.get_mut(&dropped.target_id) {
                *count = count.saturating_sub(1);
            }
        }

        // Top up to the fan-out, most-starved Group Two node first. This
        // round-robin balancing also guarantees coverage whenever the
        // capacity makes it feasible.
        let mut have: HashSet<String> = current.iter().map(|e| e.target_id.clone()).collect();
        while have.len() < fan_out {
            let candidate = group2
                .iter()
                .filter(|t| !have.contains(t.as_str()))
                .min_by(|a, b| {
                    let ia = inbound.get(a.as_str()).copied().unwrap_or(0);
                    let ib = inbound.get(b.as_str()).copied().unwrap_or(0);
                    ia.cmp(&ib).then(a.cmp(b))
                })
                .cloned();

            let target = match candidate {
                Some(t) => t,
                None => break, // fewer Group Two nodes than the fan-out
            };

            *inbound.entry(target.clone()).or_default() += 1;
            have.insert(target.clone());
            plan.add.push((g1_id.clone(), target));
        }
    }

    plan
}

/// Maintains the connection graph against current membership
pub struct TopologyManager {
    store: Arc<dyn GameStore>,
    fan_out: usize,
}

impl TopologyManager {
    pub fn new(store: Arc<dyn GameStore>, fan_out: usize) -> Self {
        Self { store, fan_out }
    }

    /// Verify the graph invariants and repair incrementally if needed.
    ///
    /// Idempotent: with no membership change a second call performs zero
    /// writes. Requires a final node to exist.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let final_nodes = self.store.participants_in_group(Group::FinalNode).await?;
        let final_node = final_nodes
            .first()
            .ok_or_else(|| HivemindError::NotFound("final node participant missing".into()))?;

        let group1: Vec<String> = self
            .store
            .participants_in_group(Group::GroupOne)
            .await?
            .into_iter()
            .map(|p| p.participant_id)
            .collect();
        let group2: Vec<String> = self
            .store
            .participants_in_group(Group::GroupTwo)
            .await?
            .into_iter()
            .map(|p| p.participant_id)
            .collect();
        let edges = self.store.connections().await?;

        let plan = plan(
            &group1,
            &group2,
            &final_node.participant_id,
            &edges,
            self.fan_out,
        );

        if plan.is_noop() {
            debug!("Topology already satisfies invariants, nothing to do");
            return Ok(ReconcileReport::default());
        }

        let removed = self.store.delete_connections(&plan.remove).await? as usize;

        let new_edges: Vec<ConnectionDoc> = plan
            .add
            .iter()
            .map(|(source, target)| ConnectionDoc::new(source.clone(), target.clone()))
            .collect();
        let added = new_edges.len();
        self.store.insert_connections(new_edges).await?;

        info!(
            "Topology reconciled: {} edge(s) added, {} edge(s) removed",
            added, removed
        );

        Ok(ReconcileReport {
            edges_added: added,
            edges_removed: removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::ParticipantDoc;
    use crate::store::MemoryStore;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn edge(source: &str, target: &str) -> ConnectionDoc {
        ConnectionDoc::new(source.to_string(), target.to_string())
    }

    #[test]
    fn test_plan_from_empty_graph() {
        let g1 = ids("a", 2);
        let g2 = ids("b", 2);
        let plan = plan(&g1, &g2, "final", &[], 2);

        // 2 sink edges + 2x2 layer edges
        assert_eq!(plan.remove.len(), 0);
        assert_eq!(plan.add.len(), 6);

        // Every Group Two node is covered and feeds the sink
        for b in &g2 {
            assert!(plan.add.iter().any(|(s, t)| s == b && t == "final"));
            assert!(plan.add.iter().any(|(_, t)| t == b));
        }
    }

    #[test]
    fn test_plan_noop_when_satisfied() {
        let g1 = ids("a", 2);
        let g2 = ids("b", 2);

        let edges = vec![
            edge("b0", "final"),
            edge("b1", "final"),
            edge("a0", "b0"),
            edge("a0", "b1"),
            edge("a1", "b0"),
            edge("a1", "b1"),
        ];

        let plan = plan(&g1, &g2, "final", &edges, 2);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_plan_is_idempotent() {
        let g1 = ids("a", 3);
        let g2 = ids("b", 4);

        let first = plan(&g1, &g2, "final", &[], 2);

        // Materialize the first plan and re-plan: nothing left to do
        let edges: Vec<ConnectionDoc> = first
            .add
            .iter()
            .map(|(s, t)| edge(s, t))
            .collect();
        let second = plan(&g1, &g2, "final", &edges, 2);
        assert!(second.is_noop());
    }

    #[test]
    fn test_plan_drops_edges_of_departed_members() {
        let g1 = vec!["a0".to_string()];
        let g2 = vec!["b0".to_string()];

        let stale = edge("gone", "b0");
        let stale_id = stale.connection_id.clone();
        let edges = vec![
            edge("b0", "final"),
            edge("a0", "b0"),
            stale,
        ];

        let plan = plan(&g1, &g2, "final", &edges, 1);
        assert_eq!(plan.remove, vec![stale_id]);
        assert!(plan.add.is_empty());
    }

    #[test]
    fn test_plan_balances_inbound_round_robin() {
        let g1 = ids("a", 4);
        let g2 = ids("b", 4);

        let plan = plan(&g1, &g2, "final", &[], 2);

        let mut inbound: std::collections::HashMap<&str, usize> =
            g2.iter().map(|b| (b.as_str(), 0)).collect();
        for (_, target) in &plan.add {
            if let Some(count) = inbound.get_mut(target.as_str()) {
                *count += 1;
            }
        }

        // 4 sources x 2 edges over 4 targets: exactly 2 inbound each
        for (_, count) in inbound {
            assert_eq!(count, 2);
        }
    }

    #[test]
    fn test_plan_trims_surplus_keeping_coverage() {
        let g1 = vec!["a0".to_string(), "a1".to_string()];
        let g2 = ids("b", 3);

        // a0 has three outbound edges (surplus of one); b2 is only
        // covered by a0, so the trim must not drop a0->b2.
        let edges = vec![
            edge("b0", "final"),
            edge("b1", "final"),
            edge("b2", "final"),
            edge("a0", "b0"),
            edge("a0", "b1"),
            edge("a0", "b2"),
            edge("a1", "b0"),
            edge("a1", "b1"),
        ];

        let result = plan(&g1, &g2, "final", &edges, 2);
        assert_eq!(result.remove.len(), 1);
        assert!(result.add.is_empty());

        let removed_id = &result.remove[0];
        let removed = edges
            .iter()
            .find(|e| &e.connection_id == removed_id)
            .unwrap();
        assert_ne!(removed.target_id, "b2");
    }

    #[tokio::test]
    async fn test_reconcile_preserves_learned_weights() {
        let store = Arc::new(MemoryStore::new());

        for id in ["a0", "a1"] {
            store
                .insert_participant(ParticipantDoc::new(
                    id.into(),
                    Group::GroupOne,
                    true,
                    "x".into(),
                ))
                .await
                .unwrap();
        }
        store
            .insert_participant(ParticipantDoc::new(
                "b0".into(),
                Group::GroupTwo,
                true,
                "x".into(),
            ))
            .await
            .unwrap();
        store
            .insert_participant(ParticipantDoc::new(
                "final".into(),
                Group::FinalNode,
                true,
                "x".into(),
            ))
            .await
            .unwrap();

        let manager = TopologyManager::new(store.clone() as Arc<dyn GameStore>, 2);
        manager.reconcile().await.unwrap();

        // Train one surviving edge, then add a member and reconcile again
        let edges = store.connections().await.unwrap();
        let trained = edges
            .iter()
            .find(|e| e.source_id == "b0" && e.target_id == "final")
            .unwrap();
        store
            .cas_weight(&trained.connection_id, 0, 0.9, 1)
            .await
            .unwrap();

        store
            .insert_participant(ParticipantDoc::new(
                "b1".into(),
                Group::GroupTwo,
                true,
                "x".into(),
            ))
            .await
            .unwrap();
        manager.reconcile().await.unwrap();

        let edges = store.connections().await.unwrap();
        let survived = edges
            .iter()
            .find(|e| e.source_id == "b0" && e.target_id == "final")
            .unwrap();
        assert_eq!(survived.weight, 0.9);
    }

    #[tokio::test]
    async fn test_reconcile_noop_second_run() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_participant(ParticipantDoc::new(
                "a0".into(),
                Group::GroupOne,
                true,
                "x".into(),
            ))
            .await
            .unwrap();
        store
            .insert_participant(ParticipantDoc::new(
                "b0".into(),
                Group::GroupTwo,
                true,
                "x".into(),
            ))
            .await
            .unwrap();
        store
            .insert_participant(ParticipantDoc::new(
                "final".into(),
                Group::FinalNode,
                true,
                "x".into(),
            ))
            .await
            .unwrap();

        let manager = TopologyManager::new(store.clone() as Arc<dyn GameStore>, 2);
        let first = manager.reconcile().await.unwrap();
        assert!(first.edges_added > 0);

        let second = manager.reconcile().await.unwrap();
        assert_eq!(second.edges_added, 0);
        assert_eq!(second.edges_removed, 0);
    }
}
