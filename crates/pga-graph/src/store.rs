//! Graph store interface and the in-memory backend.
//!
//! Every write is merge-if-absent: re-running the same build leaves the
//! store unchanged. Edges may only connect nodes that already exist.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};

use crate::model::{GraphEdge, GraphNode, MergeOutcome, NodeLabel, NodeRef};

/// Minimal query interface the builder and detectors are written against.
pub trait GraphStore {
    /// Create the node, or fold it into the existing node with the same key.
    fn merge_node(&mut self, node: GraphNode) -> Result<MergeOutcome>;

    /// Create the relationship unless an identical one exists.
    fn merge_edge(&mut self, edge: GraphEdge) -> Result<MergeOutcome>;

    fn node(&self, node: &NodeRef) -> Result<Option<GraphNode>>;

    /// All nodes of one label, ordered by id.
    fn nodes(&self, label: NodeLabel) -> Result<Vec<GraphNode>>;

    /// Relationships leaving `node`, ordered by relationship then target.
    fn outgoing(&self, node: &NodeRef) -> Result<Vec<GraphEdge>>;

    fn edges(&self) -> Result<Vec<GraphEdge>>;

    /// Remove every node with one of `labels` and every edge touching one.
    /// Returns the number of removed nodes.
    fn clear_labels(&mut self, labels: &[NodeLabel]) -> Result<usize>;
}

/// Fold `incoming` into `existing` following the merge-if-absent rule.
pub(crate) fn merge_into(
    existing: Option<GraphNode>,
    incoming: GraphNode,
) -> Result<(GraphNode, MergeOutcome)> {
    match existing {
        None => Ok((incoming, MergeOutcome::Created)),
        Some(mut have) => {
            let changed = have.absorb(incoming).map_err(|e| anyhow!(e))?;
            let outcome = if changed {
                MergeOutcome::Updated
            } else {
                MergeOutcome::Unchanged
            };
            Ok((have, outcome))
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct MemoryGraph {
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeMap<String, GraphEdge>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

impl GraphStore for MemoryGraph {
    fn merge_node(&mut self, node: GraphNode) -> Result<MergeOutcome> {
        let key = node.node_ref().key();
        let (merged, outcome) = merge_into(self.nodes.get(&key).cloned(), node)?;
        if outcome != MergeOutcome::Unchanged {
            self.nodes.insert(key, merged);
        }
        Ok(outcome)
    }

    fn merge_edge(&mut self, edge: GraphEdge) -> Result<MergeOutcome> {
        for end in [&edge.src, &edge.dst] {
            if !self.nodes.contains_key(&end.key()) {
                bail!("cannot create {} edge: node {} does not exist", edge.rel, end);
            }
        }
        let key = edge.key();
        if self.edges.contains_key(&key) {
            return Ok(MergeOutcome::Unchanged);
        }
        self.edges.insert(key, edge);
        Ok(MergeOutcome::Created)
    }

    fn node(&self, node: &NodeRef) -> Result<Option<GraphNode>> {
        Ok(self.nodes.get(&node.key()).cloned())
    }

    fn nodes(&self, label: NodeLabel) -> Result<Vec<GraphNode>> {
        let prefix = format!("{}:", label.as_str());
        Ok(self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, n)| n.clone())
            .collect())
    }

    fn outgoing(&self, node: &NodeRef) -> Result<Vec<GraphEdge>> {
        let prefix = format!("{}|", node.key());
        Ok(self
            .edges
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn edges(&self) -> Result<Vec<GraphEdge>> {
        Ok(self.edges.values().cloned().collect())
    }

    fn clear_labels(&mut self, labels: &[NodeLabel]) -> Result<usize> {
        let before = self.nodes.len();
        self.nodes.retain(|_, n| !labels.contains(&n.label()));
        self.edges
            .retain(|_, e| !labels.contains(&e.src.label) && !labels.contains(&e.dst.label));
        Ok(before - self.nodes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConditionNode, Relationship, RoleNode, RuleNode};
    use pga_policy_dsl::ConditionKind;

    fn rule(id: &str, expr: &str) -> GraphNode {
        GraphNode::Rule(RuleNode {
            id: id.into(),
            expression: expr.into(),
            normalized: expr.into(),
            originals: vec![expr.into()],
        })
    }

    fn role_condition(value: &str) -> GraphNode {
        GraphNode::Condition(ConditionNode::new(ConditionKind::Role, value))
    }

    #[test]
    fn test_merge_node_idempotent() {
        let mut g = MemoryGraph::new();
        assert_eq!(g.merge_node(rule("rule1", "role:admin")).unwrap(), MergeOutcome::Created);
        assert_eq!(
            g.merge_node(rule("rule1", "role:admin")).unwrap(),
            MergeOutcome::Unchanged
        );
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn test_edge_requires_endpoints() {
        let mut g = MemoryGraph::new();
        g.merge_node(rule("rule1", "role:admin")).unwrap();
        let edge = GraphEdge::new(
            NodeRef::new(NodeLabel::Rule, "rule1"),
            Relationship::requires(ConditionKind::Role),
            NodeRef::new(NodeLabel::Condition, "role:admin"),
        );
        assert!(g.merge_edge(edge.clone()).is_err());

        g.merge_node(role_condition("admin")).unwrap();
        assert_eq!(g.merge_edge(edge.clone()).unwrap(), MergeOutcome::Created);
        assert_eq!(g.merge_edge(edge).unwrap(), MergeOutcome::Unchanged);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_nodes_by_label_and_outgoing() {
        let mut g = MemoryGraph::new();
        g.merge_node(rule("rule1", "role:a")).unwrap();
        g.merge_node(rule("rule2", "role:b")).unwrap();
        g.merge_node(role_condition("a")).unwrap();
        g.merge_node(GraphNode::Role(RoleNode {
            id: "r-1".into(),
            name: "a".into(),
        }))
        .unwrap();
        g.merge_edge(GraphEdge::new(
            NodeRef::new(NodeLabel::Rule, "rule1"),
            Relationship::requires(ConditionKind::Role),
            NodeRef::new(NodeLabel::Condition, "role:a"),
        ))
        .unwrap();

        assert_eq!(g.nodes(NodeLabel::Rule).unwrap().len(), 2);
        assert_eq!(g.nodes(NodeLabel::Role).unwrap().len(), 1);
        assert_eq!(g.outgoing(&NodeRef::new(NodeLabel::Rule, "rule1")).unwrap().len(), 1);
        assert!(g.outgoing(&NodeRef::new(NodeLabel::Rule, "rule2")).unwrap().is_empty());
    }

    #[test]
    fn test_clear_labels_keeps_others() {
        let mut g = MemoryGraph::new();
        g.merge_node(rule("rule1", "role:a")).unwrap();
        g.merge_node(role_condition("a")).unwrap();
        g.merge_node(GraphNode::Role(RoleNode {
            id: "r-1".into(),
            name: "a".into(),
        }))
        .unwrap();
        g.merge_edge(GraphEdge::new(
            NodeRef::new(NodeLabel::Rule, "rule1"),
            Relationship::requires(ConditionKind::Role),
            NodeRef::new(NodeLabel::Condition, "role:a"),
        ))
        .unwrap();

        let removed = g.clear_labels(&NodeLabel::POLICY_GRAPH).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.edge_count(), 0);
    }
}
