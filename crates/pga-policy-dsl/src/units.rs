//! Minimal matching unit extraction.
//!
//! A rule expression is reduced to its disjunctive normal form: a list of
//! conjunctive units, each mapping a condition kind to the values that must
//! all hold. The rule matches iff at least one unit is fully satisfied.
//!
//! `and` is the cartesian product of its children's units, `or` is their
//! concatenation, `@` is the single empty unit and `!` yields no unit.
//! Atoms whose kind is outside [`ConditionKind`] are dropped from their
//! conjunction with a warning. `not` renames every key of the child's units
//! to `not_<key>`; it marks negation, it does not compute it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ast::{BoolExpr, ConditionKind};

/// One conjunctive clause: condition kind → ordered, unique values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinimalUnit(BTreeMap<String, Vec<String>>);

impl MinimalUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(kind: impl Into<String>, value: impl Into<String>) -> Self {
        let mut unit = Self::new();
        unit.insert(kind, value);
        unit
    }

    /// Add `value` under `kind` unless already present.
    pub fn insert(&mut self, kind: impl Into<String>, value: impl Into<String>) {
        let values = self.0.entry(kind.into()).or_default();
        let value = value.into();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    /// An empty unit imposes no condition.
    pub fn is_unconditional(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, kind: &str) -> Option<&[String]> {
        self.0.get(kind).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn merge(&mut self, other: &MinimalUnit) {
        for (kind, values) in &other.0 {
            for value in values {
                self.insert(kind.clone(), value.clone());
            }
        }
    }

    fn negated(&self) -> MinimalUnit {
        MinimalUnit(
            self.0
                .iter()
                .map(|(kind, values)| (format!("not_{kind}"), values.clone()))
                .collect(),
        )
    }

    /// Sorted, deduplicated `kind:value` pairs joined by ` and `; `@` for
    /// the unconditional unit. Equal signatures mean equal clauses.
    pub fn signature(&self) -> String {
        let mut pairs: Vec<String> = self
            .0
            .iter()
            .flat_map(|(kind, values)| values.iter().map(move |v| format!("{kind}:{v}")))
            .collect();
        if pairs.is_empty() {
            return "@".to_string();
        }
        pairs.sort();
        pairs.dedup();
        pairs.join(" and ")
    }
}

impl FromIterator<(String, String)> for MinimalUnit {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut unit = MinimalUnit::new();
        for (kind, value) in iter {
            unit.insert(kind, value);
        }
        unit
    }
}

/// Extract units with no policy context for warnings.
pub fn extract(node: &BoolExpr) -> Vec<MinimalUnit> {
    UnitExtractor::new("<expression>").extract(node)
}

/// Extractor bound to the policy whose expression is being reduced, so
/// dropped atoms can be traced back to it.
pub struct UnitExtractor<'a> {
    policy: &'a str,
    dropped: Vec<String>,
}

impl<'a> UnitExtractor<'a> {
    pub fn new(policy: &'a str) -> Self {
        Self {
            policy,
            dropped: Vec::new(),
        }
    }

    pub fn extract(&mut self, node: &BoolExpr) -> Vec<MinimalUnit> {
        self.reduce(node).unwrap_or_default()
    }

    /// `kind:value` texts of atoms dropped so far.
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    /// `None` means every atom below was dropped; `Some(vec![])` means the
    /// subtree can never match.
    fn reduce(&mut self, node: &BoolExpr) -> Option<Vec<MinimalUnit>> {
        match node {
            BoolExpr::Always => Some(vec![MinimalUnit::new()]),
            BoolExpr::Never => Some(Vec::new()),
            BoolExpr::Atom { kind, value } => match ConditionKind::from_field(kind) {
                Some(canonical) => Some(vec![MinimalUnit::single(canonical.as_str(), value)]),
                None => {
                    tracing::warn!(
                        policy = %self.policy,
                        kind = %kind,
                        value = %value,
                        "dropping condition with unsupported kind"
                    );
                    self.dropped.push(format!("{kind}:{value}"));
                    None
                }
            },
            BoolExpr::Not(child) => self
                .reduce(child)
                .map(|units| units.iter().map(MinimalUnit::negated).collect()),
            BoolExpr::And(children) => {
                let mut product: Option<Vec<MinimalUnit>> = None;
                for child in children {
                    let Some(units) = self.reduce(child) else {
                        continue;
                    };
                    product = Some(match product {
                        None => units,
                        Some(acc) => cartesian(&acc, &units),
                    });
                }
                product
            }
            BoolExpr::Or(children) => {
                let mut union: Option<Vec<MinimalUnit>> = None;
                for child in children {
                    if let Some(units) = self.reduce(child) {
                        union.get_or_insert_with(Vec::new).extend(units);
                    }
                }
                union
            }
        }
    }
}

fn cartesian(left: &[MinimalUnit], right: &[MinimalUnit]) -> Vec<MinimalUnit> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            let mut merged = l.clone();
            merged.merge(r);
            out.push(merged);
        }
    }
    out
}
