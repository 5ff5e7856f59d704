//! High/low privilege role mismatch check (codes 12 and 13).
//!
//! For every (api, project) pair the roles a policy grants are split into
//! the configured high and low tiers. When one tier holds at least 80% (but
//! not all) of the tiered roles, the other tier's members are probably
//! misassigned.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pga_graph::PolicyView;
use serde::Serialize;

use crate::finding::{Finding, FindingKind};
use crate::lookup::RoleLevels;

/// Project name used for rules without a project condition.
pub const DEFAULT_PROJECT: &str = "default";

const EXCLUDED_ROLE: &str = "admin";
const DOMINANT_PERCENT: f64 = 80.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierRow {
    pub api: String,
    pub project_name: String,
    pub high_roles: Vec<String>,
    pub low_roles: Vec<String>,
    pub high_percent: f64,
    pub low_percent: f64,
    #[serde(skip)]
    pub policy_rule: Vec<String>,
}

impl TierRow {
    fn new(
        api: &str,
        project_name: &str,
        roles: &BTreeSet<String>,
        levels: &RoleLevels,
        policy_rule: Vec<String>,
    ) -> Self {
        let high: BTreeSet<&str> = levels.high_authorized.iter().map(String::as_str).collect();
        let low: BTreeSet<&str> = levels.low_authorized.iter().map(String::as_str).collect();
        let high_roles: Vec<String> = roles
            .iter()
            .filter(|r| r.as_str() != EXCLUDED_ROLE && high.contains(r.as_str()))
            .cloned()
            .collect();
        let low_roles: Vec<String> = roles
            .iter()
            .filter(|r| r.as_str() != EXCLUDED_ROLE && low.contains(r.as_str()))
            .cloned()
            .collect();
        let total = (high_roles.len() + low_roles.len()) as f64;
        let percent = |n: usize| if total > 0.0 { n as f64 * 100.0 / total } else { 0.0 };
        Self {
            api: api.to_string(),
            project_name: project_name.to_string(),
            high_percent: percent(high_roles.len()),
            low_percent: percent(low_roles.len()),
            high_roles,
            low_roles,
            policy_rule,
        }
    }

    pub fn high_num(&self) -> usize {
        self.high_roles.len()
    }

    pub fn low_num(&self) -> usize {
        self.low_roles.len()
    }
}

/// Group granted roles by (api, project name), ordered by both.
pub fn collect_tier_rows(
    views: &[PolicyView],
    levels: &RoleLevels,
    projects: &BTreeMap<String, String>,
) -> Vec<TierRow> {
    let mut grouped: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
    let mut lines: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for view in views {
        for rule in &view.rules {
            let roles = rule.values("REQUIRES_ROLE");
            if roles.is_empty() {
                continue;
            }
            lines
                .entry(view.policy.id.clone())
                .or_insert_with(|| view.policy.source_lines());
            let mut project_ids = rule.values("REQUIRES_PROJECT");
            if project_ids.is_empty() {
                project_ids.push(DEFAULT_PROJECT);
            }
            for project_id in project_ids {
                let project_name = projects
                    .get(project_id)
                    .map_or(project_id, String::as_str)
                    .to_string();
                grouped
                    .entry((view.policy.id.clone(), project_name))
                    .or_default()
                    .extend(roles.iter().map(|r| r.to_string()));
            }
        }
    }

    grouped
        .into_iter()
        .map(|((api, project_name), roles)| {
            let policy_rule = lines.get(&api).cloned().unwrap_or_default();
            TierRow::new(&api, &project_name, &roles, levels, policy_rule)
        })
        .collect()
}

fn is_dominant(percent: f64) -> bool {
    (DOMINANT_PERCENT..100.0).contains(&percent)
}

pub fn check_role_tiers(rows: &[TierRow]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for row in rows {
        if is_dominant(row.low_percent) && row.high_num() > 0 {
            findings.push(Finding::new(
                row.policy_rule.clone(),
                FindingKind::LowTierDominant {
                    api: row.api.clone(),
                    project_name: row.project_name.clone(),
                    high_roles: row.high_roles.clone(),
                    low_roles: row.low_roles.clone(),
                },
            ));
        }
        if is_dominant(row.high_percent) && row.low_num() > 0 {
            findings.push(Finding::new(
                row.policy_rule.clone(),
                FindingKind::HighTierDominant {
                    api: row.api.clone(),
                    project_name: row.project_name.clone(),
                    low_roles: row.low_roles.clone(),
                },
            ));
        }
    }
    findings
}

/// Write `RoleStatistic<YYYYmmddHHMMSS>.csv` into `dir`.
pub fn write_tier_csv(dir: &Path, rows: &[TierRow]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create '{}'", dir.display()))?;
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let path = dir.join(format!("RoleStatistic{stamp}.csv"));
    let mut writer = csv::Writer::from_path(&path)
        .with_context(|| format!("failed to create '{}'", path.display()))?;
    writer.write_record([
        "api",
        "project_name",
        "high_authorized_num",
        "high_authorized_percent",
        "low_authorized_num",
        "low_authorized_percent",
    ])?;
    for row in rows {
        writer.write_record([
            row.api.clone(),
            row.project_name.clone(),
            row.high_num().to_string(),
            format!("{:.2}", row.high_percent),
            row.low_num().to_string(),
            format!("{:.2}", row.low_percent),
        ])?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), rows = rows.len(), "role statistics written");
    Ok(path)
}
