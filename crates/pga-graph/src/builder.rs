//! Policy graph builder.
//!
//! Turns a [`PolicyDict`] into Policy → Rule → Condition nodes. Rules are
//! identified by their normalized text: the first occurrence in a
//! [`BuildSession`] gets the next `rule<N>` id and has its conditions
//! written, later occurrences only gain a `HAS_RULE` edge.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use pga_policy_dsl::{ConditionKind, PolicyDict, PolicyEntry, normalize, parse_expression};
use serde::{Deserialize, Serialize};

use crate::model::{
    ConditionNode, GraphEdge, GraphNode, NodeLabel, NodeRef, PolicyNode, Relationship, RuleNode,
};
use crate::store::GraphStore;

/// A rule referenced by more than one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedRule {
    pub rule_id: String,
    pub expression: String,
    pub policies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub policy: String,
    pub reason: String,
}

/// Observable result of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub policies: usize,
    pub rules: usize,
    pub conditions: usize,
    pub has_rule_edges: usize,
    pub requires_edges: usize,
    pub shared_rules: Vec<SharedRule>,
    pub skipped: Vec<SkippedItem>,
}

struct SessionRule {
    id: String,
    expression: String,
    policies: Vec<String>,
}

/// Dedup context of a single build. Dropped when the build finishes.
#[derive(Default)]
pub struct BuildSession {
    next_rule: usize,
    /// normalized text → index into `rules`
    rule_index: HashMap<String, usize>,
    rules: Vec<SessionRule>,
    policies: BTreeSet<String>,
    conditions: BTreeSet<String>,
    has_rule_edges: usize,
    requires_edges: usize,
    skipped: Vec<SkippedItem>,
}

/// Build the whole dict in a fresh session.
pub fn build_policy_graph<S: GraphStore + ?Sized>(
    store: &mut S,
    dict: &PolicyDict,
) -> Result<BuildSummary> {
    let mut session = BuildSession::new();
    for entry in dict.entries() {
        session.build_policy(store, entry)?;
    }
    let summary = session.finish();
    tracing::info!(
        policies = summary.policies,
        rules = summary.rules,
        conditions = summary.conditions,
        shared = summary.shared_rules.len(),
        skipped = summary.skipped.len(),
        "policy graph built"
    );
    Ok(summary)
}

impl BuildSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one policy and all of its rule expressions.
    ///
    /// Only store failures are errors; a malformed key or expression is
    /// skipped with a warning and recorded in the summary.
    pub fn build_policy<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        entry: &PolicyEntry,
    ) -> Result<()> {
        let Some(mut policy) = PolicyNode::from_key(&entry.key) else {
            tracing::warn!(policy = %entry.key, "policy key has no type prefix, skipping");
            self.skip(&entry.key, "policy key has no '<type>:' prefix");
            return Ok(());
        };
        policy.sources = entry.sources.clone();
        let policy_ref = NodeRef::new(NodeLabel::Policy, &policy.id);
        store
            .merge_node(GraphNode::Policy(policy))
            .with_context(|| format!("failed to write policy node '{}'", entry.key))?;
        self.policies.insert(entry.key.clone());

        for expression in &entry.expressions {
            let Some(rule_ref) = self.rule_for(store, &entry.key, expression)? else {
                continue;
            };
            let edge = GraphEdge::new(policy_ref.clone(), Relationship::HasRule, rule_ref);
            if store.merge_edge(edge)?.is_created() {
                self.has_rule_edges += 1;
            }
        }
        Ok(())
    }

    /// Resolve `expression` to a rule node, creating it on first sight.
    fn rule_for<S: GraphStore + ?Sized>(
        &mut self,
        store: &mut S,
        policy: &str,
        expression: &str,
    ) -> Result<Option<NodeRef>> {
        let normalized = normalize(expression);

        if let Some(&idx) = self.rule_index.get(&normalized) {
            let rule = &mut self.rules[idx];
            if !rule.policies.iter().any(|p| p == policy) {
                rule.policies.push(policy.to_string());
            }
            let id = rule.id.clone();
            store.merge_node(GraphNode::Rule(RuleNode {
                id: id.clone(),
                expression: rule.expression.clone(),
                normalized,
                originals: vec![expression.to_string()],
            }))?;
            return Ok(Some(NodeRef::new(NodeLabel::Rule, id)));
        }

        let tree = match parse_expression(&normalized) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(%policy, %expression, error = %e, "skipping unparseable rule");
                self.skip(policy, &format!("unparseable rule '{expression}': {e}"));
                return Ok(None);
            }
        };

        self.next_rule += 1;
        let id = format!("rule{}", self.next_rule);
        let rule_ref = NodeRef::new(NodeLabel::Rule, &id);
        store
            .merge_node(GraphNode::Rule(RuleNode {
                id: id.clone(),
                expression: expression.to_string(),
                normalized: normalized.clone(),
                originals: vec![expression.to_string()],
            }))
            .with_context(|| format!("failed to write rule node '{id}'"))?;

        for atom in tree.atoms() {
            let Some(kind) = ConditionKind::from_field(&atom.kind) else {
                tracing::warn!(
                    %policy,
                    rule = %id,
                    kind = %atom.kind,
                    value = %atom.value,
                    "unsupported condition kind, no condition node written"
                );
                continue;
            };
            let condition = ConditionNode::new(kind, &atom.value);
            let condition_ref = NodeRef::new(NodeLabel::Condition, &condition.id);
            self.conditions.insert(condition.id.clone());
            store.merge_node(GraphNode::Condition(condition))?;

            let rel = Relationship::Requires {
                kind,
                negated: atom.negated,
            };
            if store
                .merge_edge(GraphEdge::new(rule_ref.clone(), rel, condition_ref))?
                .is_created()
            {
                self.requires_edges += 1;
            }
        }

        self.rule_index.insert(normalized, self.rules.len());
        self.rules.push(SessionRule {
            id,
            expression: expression.to_string(),
            policies: vec![policy.to_string()],
        });
        Ok(Some(rule_ref))
    }

    fn skip(&mut self, policy: &str, reason: &str) {
        self.skipped.push(SkippedItem {
            policy: policy.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn finish(self) -> BuildSummary {
        let shared_rules = self
            .rules
            .iter()
            .filter(|r| r.policies.len() > 1)
            .map(|r| SharedRule {
                rule_id: r.id.clone(),
                expression: r.expression.clone(),
                policies: r.policies.clone(),
            })
            .collect();
        BuildSummary {
            policies: self.policies.len(),
            rules: self.rules.len(),
            conditions: self.conditions.len(),
            has_rule_edges: self.has_rule_edges,
            requires_edges: self.requires_edges,
            shared_rules,
            skipped: self.skipped,
        }
    }
}
