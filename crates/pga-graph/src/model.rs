//! Graph data model: labeled nodes, typed relationships and the
//! merge-if-absent rule every backend applies.

use std::fmt;
use std::str::FromStr;

use pga_policy_dsl::{ConditionKind, SourceLine};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Policy,
    Rule,
    Condition,
    User,
    Token,
    Role,
    SystemScope,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 7] = [
        NodeLabel::Policy,
        NodeLabel::Rule,
        NodeLabel::Condition,
        NodeLabel::User,
        NodeLabel::Token,
        NodeLabel::Role,
        NodeLabel::SystemScope,
    ];

    /// Labels written by the policy graph builder.
    pub const POLICY_GRAPH: [NodeLabel; 3] =
        [NodeLabel::Policy, NodeLabel::Rule, NodeLabel::Condition];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Policy => "PolicyNode",
            NodeLabel::Rule => "RuleNode",
            NodeLabel::Condition => "ConditionNode",
            NodeLabel::User => "User",
            NodeLabel::Token => "Token",
            NodeLabel::Role => "Role",
            NodeLabel::SystemScope => "SystemScope",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a node: label plus identity key within that label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub label: NodeLabel,
    pub id: String,
}

impl NodeRef {
    pub fn new(label: NodeLabel, id: impl Into<String>) -> Self {
        Self {
            label,
            id: id.into(),
        }
    }

    /// Storage key `<Label>:<id>`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.label.as_str(), self.id)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}:{})", self.label, self.id)
    }
}

// ---------------------------------------------------------------------------
// Node payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyNode {
    /// `<type>:<name>`
    pub id: String,
    pub policy_type: String,
    pub name: String,
    /// Type-derived secondary label, e.g. `IdentityPolicy`.
    pub type_label: String,
    pub sources: Vec<SourceLine>,
}

impl PolicyNode {
    /// Split a policy key on its first colon. `None` when there is no colon.
    pub fn from_key(key: &str) -> Option<Self> {
        let (policy_type, name) = key.split_once(':')?;
        Some(Self {
            id: key.to_string(),
            policy_type: policy_type.to_string(),
            name: name.to_string(),
            type_label: format!("{}Policy", camel_case(policy_type)),
            sources: Vec::new(),
        })
    }

    /// `line N: name` entries for reports, one per source line.
    pub fn source_lines(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| format!("line {}: {}", s.line, self.id))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleNode {
    /// `rule<N>`
    pub id: String,
    /// First-seen expression text.
    pub expression: String,
    pub normalized: String,
    /// Every distinct raw text that normalized to this rule.
    pub originals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionNode {
    /// `<kind>:<value>`
    pub id: String,
    pub kind: ConditionKind,
    pub name: String,
}

impl ConditionNode {
    pub fn new(kind: ConditionKind, value: &str) -> Self {
        Self {
            id: format!("{}:{value}", kind.as_str()),
            kind,
            name: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNode {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenNode {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleNode {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemScopeNode {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "label")]
pub enum GraphNode {
    Policy(PolicyNode),
    Rule(RuleNode),
    Condition(ConditionNode),
    User(UserNode),
    Token(TokenNode),
    Role(RoleNode),
    SystemScope(SystemScopeNode),
}

impl GraphNode {
    pub fn label(&self) -> NodeLabel {
        match self {
            GraphNode::Policy(_) => NodeLabel::Policy,
            GraphNode::Rule(_) => NodeLabel::Rule,
            GraphNode::Condition(_) => NodeLabel::Condition,
            GraphNode::User(_) => NodeLabel::User,
            GraphNode::Token(_) => NodeLabel::Token,
            GraphNode::Role(_) => NodeLabel::Role,
            GraphNode::SystemScope(_) => NodeLabel::SystemScope,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            GraphNode::Policy(n) => &n.id,
            GraphNode::Rule(n) => &n.id,
            GraphNode::Condition(n) => &n.id,
            GraphNode::User(n) => &n.id,
            GraphNode::Token(n) => &n.id,
            GraphNode::Role(n) => &n.id,
            GraphNode::SystemScope(n) => &n.id,
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.label(), self.id())
    }

    /// Label carried next to the primary one (`IdentityPolicy`, `RoleCondition`).
    pub fn secondary_label(&self) -> Option<&str> {
        match self {
            GraphNode::Policy(n) => Some(&n.type_label),
            GraphNode::Condition(n) => Some(n.kind.condition_label()),
            _ => None,
        }
    }

    /// Fold `incoming` into `self`. Returns whether anything changed.
    ///
    /// Existing properties are never overwritten; only list-valued
    /// provenance (policy source lines, rule originals) grows.
    pub fn absorb(&mut self, incoming: GraphNode) -> Result<bool, String> {
        match (self, incoming) {
            (GraphNode::Policy(have), GraphNode::Policy(new)) => {
                Ok(append_unique(&mut have.sources, new.sources))
            }
            (GraphNode::Rule(have), GraphNode::Rule(new)) => {
                if have.normalized != new.normalized {
                    return Err(format!(
                        "rule id '{}' already holds '{}', refusing to rebind it to '{}'",
                        have.id, have.normalized, new.normalized
                    ));
                }
                Ok(append_unique(&mut have.originals, new.originals))
            }
            (have, new) if have.label() == new.label() => Ok(false),
            (have, new) => Err(format!(
                "node {} cannot absorb a {} node",
                have.node_ref(),
                new.label()
            )),
        }
    }

    pub fn as_policy(&self) -> Option<&PolicyNode> {
        match self {
            GraphNode::Policy(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_rule(&self) -> Option<&RuleNode> {
        match self {
            GraphNode::Rule(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_condition(&self) -> Option<&ConditionNode> {
        match self {
            GraphNode::Condition(n) => Some(n),
            _ => None,
        }
    }
}

fn append_unique<T: PartialEq>(have: &mut Vec<T>, new: Vec<T>) -> bool {
    let mut changed = false;
    for item in new {
        if !have.contains(&item) {
            have.push(item);
            changed = true;
        }
    }
    changed
}

/// `os_compute_api` → `OsComputeApi`
fn camel_case(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Relationship {
    HasRule,
    Requires { kind: ConditionKind, negated: bool },
    HasToken,
    Grants,
    HasSystemScope,
}

impl Relationship {
    pub fn requires(kind: ConditionKind) -> Self {
        Relationship::Requires {
            kind,
            negated: false,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Relationship::HasRule => "HAS_RULE".to_string(),
            Relationship::Requires {
                kind,
                negated: false,
            } => kind.relationship(),
            Relationship::Requires {
                kind,
                negated: true,
            } => kind.negated_relationship(),
            Relationship::HasToken => "HAS_TOKEN".to_string(),
            Relationship::Grants => "GRANTS".to_string(),
            Relationship::HasSystemScope => "HAS_SYSTEM_SCOPE".to_string(),
        }
    }

    /// Any `REQUIRES_*` relationship.
    pub fn is_requirement(&self) -> bool {
        matches!(self, Relationship::Requires { .. })
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HAS_RULE" => return Ok(Relationship::HasRule),
            "HAS_TOKEN" => return Ok(Relationship::HasToken),
            "GRANTS" => return Ok(Relationship::Grants),
            "HAS_SYSTEM_SCOPE" => return Ok(Relationship::HasSystemScope),
            _ => {}
        }
        let suffix = s
            .strip_prefix("REQUIRES_")
            .ok_or_else(|| format!("unknown relationship type '{s}'"))?;
        let (negated, kind_text) = match suffix.strip_prefix("NOT_") {
            Some(rest) => (true, rest),
            None => (false, suffix),
        };
        let kind = ConditionKind::from_field(&kind_text.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown condition kind in relationship '{s}'"))?;
        Ok(Relationship::Requires { kind, negated })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub src: NodeRef,
    pub rel: Relationship,
    pub dst: NodeRef,
}

impl GraphEdge {
    pub fn new(src: NodeRef, rel: Relationship, dst: NodeRef) -> Self {
        Self { src, rel, dst }
    }

    /// Storage key `<srcKey>|<REL>|<dstKey>`.
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.src.key(), self.rel.name(), self.dst.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    Created,
    Updated,
    Unchanged,
}

impl MergeOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, MergeOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(line: usize) -> SourceLine {
        SourceLine {
            file: "policy.yaml".into(),
            line,
        }
    }

    #[test]
    fn test_policy_from_key() {
        let p = PolicyNode::from_key("identity:create_user").unwrap();
        assert_eq!(p.policy_type, "identity");
        assert_eq!(p.name, "create_user");
        assert_eq!(p.type_label, "IdentityPolicy");
        assert_eq!(
            PolicyNode::from_key("os_compute_api:servers:create").unwrap().type_label,
            "OsComputeApiPolicy"
        );
        assert!(PolicyNode::from_key("admin_required").is_none());
    }

    #[test]
    fn test_policy_absorb_appends_sources() {
        let mut have = PolicyNode::from_key("identity:get_user").unwrap();
        have.sources.push(source(3));
        let mut new = have.clone();
        new.sources = vec![source(3), source(9)];

        let mut node = GraphNode::Policy(have);
        assert!(node.absorb(GraphNode::Policy(new.clone())).unwrap());
        assert!(!node.absorb(GraphNode::Policy(new)).unwrap());
        assert_eq!(node.as_policy().unwrap().sources.len(), 2);
    }

    #[test]
    fn test_rule_absorb_rejects_rebinding() {
        let rule = RuleNode {
            id: "rule1".into(),
            expression: "role:admin".into(),
            normalized: "role:admin".into(),
            originals: vec!["role:admin".into()],
        };
        let mut other = rule.clone();
        other.normalized = "role:reader".into();
        let mut node = GraphNode::Rule(rule);
        assert!(node.absorb(GraphNode::Rule(other)).is_err());
    }

    #[test]
    fn test_relationship_names_roundtrip() {
        let rels = [
            Relationship::HasRule,
            Relationship::requires(ConditionKind::SystemScope),
            Relationship::Requires {
                kind: ConditionKind::Project,
                negated: true,
            },
            Relationship::Grants,
        ];
        for rel in rels {
            assert_eq!(rel.name().parse::<Relationship>().unwrap(), rel);
        }
        assert_eq!(
            Relationship::requires(ConditionKind::Project).name(),
            "REQUIRES_PROJECT"
        );
        assert!("REQUIRES_TENANT".parse::<Relationship>().is_err());
    }

    #[test]
    fn test_condition_labels() {
        let node = GraphNode::Condition(ConditionNode::new(ConditionKind::SystemScope, "all"));
        assert_eq!(node.id(), "system_scope:all");
        assert_eq!(node.secondary_label(), Some("SystemScopeCondition"));
        assert_eq!(node.node_ref().key(), "ConditionNode:system_scope:all");
    }
}
