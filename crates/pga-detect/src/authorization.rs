//! Over-authorization check against the RBAC audit log (codes 10 and 11).
//!
//! Successful audit rows are joined with the role grants into observations
//! `(api, user, project, role)`. A policy never observed is code 11; a rule
//! of an observed policy that no observation could have satisfied is
//! code 10.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use pga_graph::{PolicyView, RuleView};
use pga_policy_dsl::{UnitExtractor, parse_expression};
use serde::{Deserialize, Serialize};

use crate::finding::{Finding, FindingKind};
use crate::lookup::{AuditRecord, GrantIndex};

/// One successful call joined with one role the caller held on the project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Observation {
    pub api: String,
    pub user_name: String,
    pub project_id: String,
    /// Empty when the caller held no known role on the project.
    pub role_name: String,
}

/// Strip a trailing `(...)` call suffix: `identity:get_user(u1)` → `identity:get_user`.
pub fn normalize_api(api: &str) -> &str {
    let api = api.trim();
    if api.ends_with(')')
        && let Some(open) = api.find('(')
    {
        return api[..open].trim();
    }
    api
}

pub fn join_observations(records: &[AuditRecord], grants: &GrantIndex) -> Vec<Observation> {
    let mut observations = Vec::new();
    for record in records.iter().filter(|r| r.is_authorized()) {
        let api = normalize_api(&record.api);
        if api.is_empty() {
            continue;
        }
        let user_name = grants.user_name(record.user_id.trim()).unwrap_or_default();
        let project_id = record.project_id.trim();
        let roles = grants.roles(user_name, project_id);
        let observe = |role_name: &str| Observation {
            api: api.to_string(),
            user_name: user_name.to_string(),
            project_id: project_id.to_string(),
            role_name: role_name.to_string(),
        };
        if roles.is_empty() {
            observations.push(observe(""));
        } else {
            observations.extend(roles.iter().map(|role| observe(role)));
        }
    }
    tracing::debug!(
        records = records.len(),
        observations = observations.len(),
        "joined audit log with role grants"
    );
    observations
}

/// Observation → number of occurrences.
pub fn summarize(observations: &[Observation]) -> BTreeMap<Observation, usize> {
    let mut counts = BTreeMap::new();
    for obs in observations {
        *counts.entry(obs.clone()).or_insert(0) += 1;
    }
    counts
}

/// `api | user | role | project | count`
pub fn summary_lines(summary: &BTreeMap<Observation, usize>) -> Vec<String> {
    summary
        .iter()
        .map(|(o, count)| {
            format!(
                "{} | {} | {} | {} | {count}",
                o.api, o.user_name, o.role_name, o.project_id
            )
        })
        .collect()
}

pub fn write_observations(path: &Path, observations: &[Observation]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create '{}'", path.display()))?;
    for obs in observations {
        writer.serialize(obs)?;
    }
    writer.flush()?;
    Ok(())
}

/// `%(target.project.id)s` style values are bound at request time and
/// match whatever was observed.
fn is_template(value: &str) -> bool {
    value.starts_with("%(") && value.ends_with(")s")
}

fn accepts<S: AsRef<str>>(required: &[S], observed: &str) -> bool {
    required.is_empty()
        || required.iter().any(|r| {
            let r = r.as_ref();
            is_template(r) || r.eq_ignore_ascii_case(observed)
        })
}

/// Required `(roles, projects)` of each disjunctive branch of `rule`.
///
/// An expression that fails to parse, or whose atoms were all dropped,
/// falls back to the rule's flat requirement edges as a single branch.
fn rule_branches(rule: &RuleView) -> Vec<(Vec<String>, Vec<String>)> {
    let owned = |values: Vec<&str>| -> Vec<String> {
        values.into_iter().map(str::to_string).collect()
    };
    let flat = || {
        vec![(
            owned(rule.values("REQUIRES_ROLE")),
            owned(rule.values("REQUIRES_PROJECT")),
        )]
    };
    let Ok(tree) = parse_expression(&rule.rule.normalized) else {
        return flat();
    };
    let mut extractor = UnitExtractor::new(&rule.rule.id);
    let units = extractor.extract(&tree);
    if units.is_empty() && !extractor.dropped().is_empty() {
        return flat();
    }
    units
        .iter()
        .map(|unit| {
            let values = |kind: &str| unit.get(kind).map(<[String]>::to_vec).unwrap_or_default();
            (values("role"), values("project"))
        })
        .collect()
}

/// Whether some branch of the rule accepts some observed (role, project) pair.
fn rule_matches(branches: &[(Vec<String>, Vec<String>)], pairs: &BTreeSet<(&str, &str)>) -> bool {
    branches.iter().any(|(roles, projects)| {
        pairs
            .iter()
            .any(|(role, project)| accepts(roles, role) && accepts(projects, project))
    })
}

pub fn check_authorization(views: &[PolicyView], observations: &[Observation]) -> Vec<Finding> {
    let mut observed: BTreeMap<&str, BTreeSet<(&str, &str)>> = BTreeMap::new();
    for obs in observations {
        observed
            .entry(obs.api.as_str())
            .or_default()
            .insert((obs.role_name.as_str(), obs.project_id.as_str()));
    }

    let mut findings = Vec::new();
    for view in views {
        let api = view.policy.id.as_str();
        let Some(pairs) = observed.get(api) else {
            let expressions = view.rule_expressions();
            let combined = if expressions.is_empty() {
                "(rule expression missing)".to_string()
            } else {
                expressions.join(" OR ")
            };
            findings.push(Finding::new(
                view.policy.source_lines(),
                FindingKind::UnusedPolicy {
                    api: api.to_string(),
                    policy: format!("{api}: {combined}"),
                },
            ));
            continue;
        };
        for rule in &view.rules {
            if rule_matches(&rule_branches(rule), pairs) {
                continue;
            }
            findings.push(Finding::new(
                view.policy.source_lines(),
                FindingKind::UnusedRule {
                    api: api.to_string(),
                    rule: rule.rule.expression.clone(),
                },
            ));
        }
    }
    tracing::debug!(
        policies = views.len(),
        invoked = observed.len(),
        findings = findings.len(),
        "authorization check finished"
    );
    findings
}
