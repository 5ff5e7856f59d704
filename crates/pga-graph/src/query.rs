//! Read patterns over a built policy graph.
//!
//! Detectors never walk the store directly; they ask for materialized
//! [`PolicyView`]s (policy, its rules, each rule's requirements) and filter
//! them in memory.

use std::collections::BTreeMap;

use anyhow::Result;
use pga_common::hash::{blake3_hash, merkle_root};
use serde::{Deserialize, Serialize};

use crate::builder::SharedRule;
use crate::model::{ConditionNode, NodeLabel, NodeRef, PolicyNode, Relationship, RuleNode};
use crate::store::GraphStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub relationship: Relationship,
    pub condition: ConditionNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleView {
    pub rule: RuleNode,
    pub requirements: Vec<Requirement>,
}

impl RuleView {
    /// Condition values whose relationship name starts with `prefix`
    /// (`REQUIRES_PROJECT` matches only positive project conditions).
    pub fn values(&self, prefix: &str) -> Vec<&str> {
        self.requirements
            .iter()
            .filter(|r| r.relationship.name().starts_with(prefix))
            .map(|r| r.condition.name.as_str())
            .collect()
    }

    pub fn has(&self, prefix: &str) -> bool {
        self.requirements
            .iter()
            .any(|r| r.relationship.name().starts_with(prefix))
    }

    /// A rule without any `REQUIRES_*` relationship restricts nothing.
    pub fn is_unconditional(&self) -> bool {
        !self.requirements.iter().any(|r| r.relationship.is_requirement())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyView {
    pub policy: PolicyNode,
    pub rules: Vec<RuleView>,
}

impl PolicyView {
    pub fn rule_expressions(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.rule.expression.as_str()).collect()
    }

    /// Match a catalog entry naming either the full id (`identity:get_user`)
    /// or the short name (`get_user`), case-insensitively.
    pub fn matches_name(&self, name: &str) -> bool {
        let name = name.trim();
        if name.contains(':') {
            self.policy.id.eq_ignore_ascii_case(name)
        } else {
            self.policy.name.eq_ignore_ascii_case(name)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub policy_nodes: usize,
    /// policy type label (`IdentityPolicy`) → number of policy nodes
    pub policy_types: BTreeMap<String, usize>,
    pub rule_nodes: usize,
    pub condition_nodes: usize,
    /// condition kind → number of condition nodes
    pub condition_types: BTreeMap<String, usize>,
    pub has_rule_relationships: usize,
    /// `REQUIRES_*` type → number of relationships
    pub requires_relationships: BTreeMap<String, usize>,
    pub shared_rules: Vec<SharedRule>,
    pub identity_nodes: BTreeMap<String, usize>,
}

pub struct GraphQuery<'a, S: GraphStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: GraphStore + ?Sized> GraphQuery<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn policies(&self) -> Result<Vec<PolicyNode>> {
        Ok(self
            .store
            .nodes(NodeLabel::Policy)?
            .iter()
            .filter_map(|n| n.as_policy().cloned())
            .collect())
    }

    /// Rules reachable from `policy_id` through `HAS_RULE`.
    pub fn rules_of(&self, policy_id: &str) -> Result<Vec<RuleNode>> {
        let mut rules = Vec::new();
        for edge in self
            .store
            .outgoing(&NodeRef::new(NodeLabel::Policy, policy_id))?
        {
            if edge.rel != Relationship::HasRule {
                continue;
            }
            if let Some(node) = self.store.node(&edge.dst)?
                && let Some(rule) = node.as_rule()
            {
                rules.push(rule.clone());
            }
        }
        Ok(rules)
    }

    pub fn requirements(&self, rule_id: &str) -> Result<Vec<Requirement>> {
        let mut out = Vec::new();
        for edge in self.store.outgoing(&NodeRef::new(NodeLabel::Rule, rule_id))? {
            if !edge.rel.is_requirement() {
                continue;
            }
            if let Some(node) = self.store.node(&edge.dst)?
                && let Some(condition) = node.as_condition()
            {
                out.push(Requirement {
                    relationship: edge.rel,
                    condition: condition.clone(),
                });
            }
        }
        Ok(out)
    }

    pub fn policy_view(&self, policy: PolicyNode) -> Result<PolicyView> {
        let mut rules = Vec::new();
        for rule in self.rules_of(&policy.id)? {
            let requirements = self.requirements(&rule.id)?;
            rules.push(RuleView { rule, requirements });
        }
        Ok(PolicyView { policy, rules })
    }

    /// Every policy with its rules and requirements, ordered by policy id.
    pub fn policy_views(&self) -> Result<Vec<PolicyView>> {
        self.policies()?
            .into_iter()
            .map(|p| self.policy_view(p))
            .collect()
    }

    /// Rules with more than one incoming `HAS_RULE`.
    pub fn shared_rules(&self) -> Result<Vec<SharedRule>> {
        let mut users: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for edge in self.store.edges()? {
            if edge.rel == Relationship::HasRule {
                users.entry(edge.dst.id).or_default().push(edge.src.id);
            }
        }
        let mut shared = Vec::new();
        for (rule_id, policies) in users {
            if policies.len() < 2 {
                continue;
            }
            let expression = self
                .store
                .node(&NodeRef::new(NodeLabel::Rule, &rule_id))?
                .and_then(|n| n.as_rule().map(|r| r.expression.clone()))
                .unwrap_or_default();
            shared.push(SharedRule {
                rule_id,
                expression,
                policies,
            });
        }
        Ok(shared)
    }

    pub fn statistics(&self) -> Result<GraphStatistics> {
        let mut stats = GraphStatistics {
            rule_nodes: self.store.nodes(NodeLabel::Rule)?.len(),
            ..GraphStatistics::default()
        };
        for node in self.store.nodes(NodeLabel::Policy)? {
            stats.policy_nodes += 1;
            if let Some(label) = node.secondary_label() {
                *stats.policy_types.entry(label.to_string()).or_insert(0) += 1;
            }
        }
        for node in self.store.nodes(NodeLabel::Condition)? {
            if let Some(condition) = node.as_condition() {
                stats.condition_nodes += 1;
                *stats
                    .condition_types
                    .entry(condition.kind.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        for edge in self.store.edges()? {
            match edge.rel {
                Relationship::HasRule => stats.has_rule_relationships += 1,
                Relationship::Requires { .. } => {
                    *stats.requires_relationships.entry(edge.rel.name()).or_insert(0) += 1;
                }
                _ => {}
            }
        }
        for label in [
            NodeLabel::User,
            NodeLabel::Token,
            NodeLabel::Role,
            NodeLabel::SystemScope,
        ] {
            let count = self.store.nodes(label)?.len();
            if count > 0 {
                stats.identity_nodes.insert(label.as_str().to_string(), count);
            }
        }
        stats.shared_rules = self.shared_rules()?;
        Ok(stats)
    }

    /// Merkle root over sorted node keys and edge keys, hex encoded.
    ///
    /// Two stores holding the same nodes and relationships have the same
    /// fingerprint regardless of write order.
    pub fn fingerprint(&self) -> Result<String> {
        let mut node_keys = Vec::new();
        for label in NodeLabel::ALL {
            for node in self.store.nodes(label)? {
                node_keys.push(node.node_ref().key());
            }
        }
        node_keys.sort();
        let mut edge_keys: Vec<String> = self.store.edges()?.iter().map(|e| e.key()).collect();
        edge_keys.sort();

        let nodes_root = merkle_root(
            &node_keys
                .iter()
                .map(|k| blake3_hash(k.as_bytes()))
                .collect::<Vec<_>>(),
        );
        let edges_root = merkle_root(
            &edge_keys
                .iter()
                .map(|k| blake3_hash(k.as_bytes()))
                .collect::<Vec<_>>(),
        );
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(&nodes_root);
        combined[32..].copy_from_slice(&edges_root);
        Ok(hex::encode(blake3_hash(&combined)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_policy_graph;
    use crate::store::MemoryGraph;
    use pga_policy_dsl::PolicyDict;

    fn built(pairs: Vec<(&str, Vec<&str>)>) -> MemoryGraph {
        let dict: PolicyDict = pairs.into_iter().collect();
        let mut g = MemoryGraph::new();
        build_policy_graph(&mut g, &dict).unwrap();
        g
    }

    #[test]
    fn test_policy_views() {
        let g = built(vec![
            ("identity:create_user", vec!["role:admin and system_scope:all"]),
            ("identity:get_user", vec!["role:reader and project_id:p1", "@"]),
        ]);
        let q = GraphQuery::new(&g);
        let views = q.policy_views().unwrap();
        assert_eq!(views.len(), 2);

        let get_user = views.iter().find(|v| v.policy.name == "get_user").unwrap();
        assert_eq!(get_user.rules.len(), 2);
        let scoped = get_user
            .rules
            .iter()
            .find(|r| r.has("REQUIRES_PROJECT"))
            .unwrap();
        assert_eq!(scoped.values("REQUIRES_PROJECT"), vec!["p1"]);
        assert_eq!(scoped.values("REQUIRES_ROLE"), vec!["reader"]);
        assert!(get_user.rules.iter().any(|r| r.is_unconditional()));
    }

    #[test]
    fn test_prefix_does_not_match_negated() {
        let g = built(vec![("identity:a", vec!["role:x and not project_id:p9"])]);
        let q = GraphQuery::new(&g);
        let rule = &q.policy_views().unwrap()[0].rules[0];
        assert!(rule.values("REQUIRES_PROJECT").is_empty());
        assert_eq!(rule.values("REQUIRES_NOT_PROJECT"), vec!["p9"]);
    }

    #[test]
    fn test_matches_name() {
        let g = built(vec![("identity:get_user", vec!["role:reader"])]);
        let view = GraphQuery::new(&g).policy_views().unwrap().remove(0);
        assert!(view.matches_name("identity:get_user"));
        assert!(view.matches_name("GET_USER"));
        assert!(!view.matches_name("compute:get_user"));
        assert!(!view.matches_name("get"));
    }

    #[test]
    fn test_shared_rules_and_statistics() {
        let g = built(vec![
            ("identity:a", vec!["role:admin"]),
            ("identity:b", vec!["role:admin"]),
            ("identity:c", vec!["role:reader and system_scope:all"]),
        ]);
        let q = GraphQuery::new(&g);
        let shared = q.shared_rules().unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].policies, vec!["identity:a", "identity:b"]);

        let stats = q.statistics().unwrap();
        assert_eq!(stats.policy_nodes, 3);
        assert_eq!(stats.policy_types["IdentityPolicy"], 3);
        assert_eq!(stats.rule_nodes, 2);
        assert_eq!(stats.condition_nodes, 3);
        assert_eq!(stats.condition_types["role"], 2);
        assert_eq!(stats.has_rule_relationships, 3);
        assert_eq!(stats.requires_relationships["REQUIRES_ROLE"], 2);
        assert_eq!(stats.requires_relationships["REQUIRES_SYSTEM_SCOPE"], 1);
    }

    #[test]
    fn test_fingerprint_stable_across_rebuild() {
        let input = vec![
            ("identity:a", vec!["role:admin or role:member"]),
            ("identity:b", vec!["role:admin or role:member", "@"]),
        ];
        let mut g = built(input.clone());
        let before = GraphQuery::new(&g).fingerprint().unwrap();

        let dict: PolicyDict = input.into_iter().collect();
        build_policy_graph(&mut g, &dict).unwrap();
        assert_eq!(GraphQuery::new(&g).fingerprint().unwrap(), before);

        let other = built(vec![("identity:a", vec!["role:admin"])]);
        assert_ne!(GraphQuery::new(&other).fingerprint().unwrap(), before);
    }
}
