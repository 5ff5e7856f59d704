//! 规则表达式布尔树

use serde::{Deserialize, Serialize};
use std::fmt;

/// 布尔表达式节点
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolExpr {
    /// `@` 或空表达式：恒真
    Always,
    /// `!`：恒假
    Never,
    /// `kind:value` 原子检查，value 不做解释
    Atom { kind: String, value: String },
    Not(Box<BoolExpr>),
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
}

/// 条件种类（规范化后的允许集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Role,
    Project,
    Domain,
    SystemScope,
    User,
}

/// 表达式中出现的扁平原子 (kind, value)，保留原始 kind 文本
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlatAtom {
    pub kind: String,
    pub value: String,
    /// 位于 `not` 之下
    pub negated: bool,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 5] = [
        ConditionKind::Role,
        ConditionKind::Project,
        ConditionKind::Domain,
        ConditionKind::SystemScope,
        ConditionKind::User,
    ];

    /// Map a raw check kind onto the allow-set, resolving field aliases.
    pub fn from_field(field: &str) -> Option<Self> {
        match field.trim().to_ascii_lowercase().as_str() {
            "role" => Some(ConditionKind::Role),
            "project" | "project_id" => Some(ConditionKind::Project),
            "domain" | "domain_id" => Some(ConditionKind::Domain),
            "system_scope" => Some(ConditionKind::SystemScope),
            "user" | "user_id" => Some(ConditionKind::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::Role => "role",
            ConditionKind::Project => "project",
            ConditionKind::Domain => "domain",
            ConditionKind::SystemScope => "system_scope",
            ConditionKind::User => "user",
        }
    }

    /// Relationship type from a rule to a condition of this kind.
    pub fn relationship(&self) -> String {
        format!("REQUIRES_{}", self.as_str().to_ascii_uppercase())
    }

    /// Relationship type for a condition that appears under `not`.
    pub fn negated_relationship(&self) -> String {
        format!("REQUIRES_NOT_{}", self.as_str().to_ascii_uppercase())
    }

    /// Secondary graph label of condition nodes of this kind.
    pub fn condition_label(&self) -> &'static str {
        match self {
            ConditionKind::Role => "RoleCondition",
            ConditionKind::Project => "ProjectCondition",
            ConditionKind::Domain => "DomainCondition",
            ConditionKind::SystemScope => "SystemScopeCondition",
            ConditionKind::User => "UserCondition",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BoolExpr {
    pub fn atom(kind: impl Into<String>, value: impl Into<String>) -> Self {
        BoolExpr::Atom {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Every atom of the tree in order of first appearance, without repeats.
    pub fn atoms(&self) -> Vec<FlatAtom> {
        let mut out = Vec::new();
        self.collect_atoms(false, &mut out);
        out
    }

    fn collect_atoms(&self, negated: bool, out: &mut Vec<FlatAtom>) {
        match self {
            BoolExpr::Always | BoolExpr::Never => {}
            BoolExpr::Atom { kind, value } => {
                let atom = FlatAtom {
                    kind: kind.clone(),
                    value: value.clone(),
                    negated,
                };
                if !out.contains(&atom) {
                    out.push(atom);
                }
            }
            BoolExpr::Not(child) => child.collect_atoms(!negated, out),
            BoolExpr::And(children) | BoolExpr::Or(children) => {
                for child in children {
                    child.collect_atoms(negated, out);
                }
            }
        }
    }

    /// Conjuncts that repeat an earlier sibling inside the same `and`,
    /// e.g. the second `role:admin` of `role:admin and role:admin`.
    pub fn repeated_conjuncts(&self) -> Vec<BoolExpr> {
        let mut out = Vec::new();
        self.collect_repeated(&mut out);
        out
    }

    fn collect_repeated(&self, out: &mut Vec<BoolExpr>) {
        match self {
            BoolExpr::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if children[..i].contains(child) && !out.contains(child) {
                        out.push(child.clone());
                    }
                    child.collect_repeated(out);
                }
            }
            BoolExpr::Or(children) => {
                for child in children {
                    child.collect_repeated(out);
                }
            }
            BoolExpr::Not(child) => child.collect_repeated(out),
            BoolExpr::Always | BoolExpr::Never | BoolExpr::Atom { .. } => {}
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, BoolExpr::And(_) | BoolExpr::Or(_))
    }
}

impl fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolExpr::Always => f.write_str("@"),
            BoolExpr::Never => f.write_str("!"),
            BoolExpr::Atom { kind, value } => write!(f, "{kind}:{value}"),
            BoolExpr::Not(child) if child.is_compound() => write!(f, "not ({child})"),
            BoolExpr::Not(child) => write!(f, "not {child}"),
            BoolExpr::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    if matches!(child, BoolExpr::Or(_)) {
                        write!(f, "({child})")?;
                    } else {
                        write!(f, "{child}")?;
                    }
                }
                Ok(())
            }
            BoolExpr::Or(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    write!(f, "{child}")?;
                }
                Ok(())
            }
        }
    }
}
