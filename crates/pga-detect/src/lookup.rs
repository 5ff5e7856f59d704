//! Collaborator lookups: sensitive-permission catalog, role grants, project
//! names, the RBAC audit log and the role-level configuration.
//!
//! A missing or unreadable file is never fatal: it is logged and the lookup
//! comes back empty (or, for role levels, with the built-in defaults).
//! Malformed rows are skipped one by one.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pga_common::PgaError;
use pga_graph::RoleGrant;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Split a multi-valued CSV cell on `,` or `|`.
pub fn split_multi(raw: &str) -> Vec<String> {
    raw.split([',', '|'])
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn csv_rows<T: DeserializeOwned, R: Read>(reader: R, origin: &str) -> Vec<T> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let mut rows = Vec::new();
    for (idx, row) in csv_reader.deserialize::<T>().enumerate() {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => {
                // header is line 1
                tracing::warn!(file = origin, line = idx + 2, error = %e, "skipping malformed row");
            }
        }
    }
    rows
}

/// Log a collaborator failure and hand the typed error back to the caller.
fn unavailable(path: &Path, what: &str, cause: impl std::fmt::Display) -> PgaError {
    let err = PgaError::Collaborator(format!("{what} '{}': {cause}", path.display()));
    tracing::warn!(
        path = %path.display(),
        error = %err,
        recoverable = err.is_recoverable(),
        "{what} unavailable, continuing with fallback data"
    );
    err
}

fn csv_file_rows<T: DeserializeOwned>(path: &Path, what: &str) -> Vec<T> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            unavailable(path, what, e);
            return Vec::new();
        }
    };
    csv_rows(file, &path.display().to_string())
}

// ============================================================
// Sensitive-permission catalog
// ============================================================

#[derive(Debug, Deserialize)]
struct SensitiveRow {
    #[serde(default, alias = "api_name", alias = "API名称")]
    policy_name: String,
    #[serde(default, alias = "Role")]
    role: String,
    #[serde(default, alias = "ProjectName")]
    project_name: String,
    #[serde(default, alias = "SystemScope")]
    system_scope: String,
}

/// 敏感权限条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveEntry {
    /// Full policy id (`identity:delete_user`) or short name (`delete_user`).
    pub policy_name: String,
    pub roles: Vec<String>,
    pub projects: Vec<String>,
    pub system_scopes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SensitiveCatalog {
    entries: Vec<SensitiveEntry>,
}

impl SensitiveCatalog {
    pub fn load(path: &Path) -> Self {
        let catalog = Self::from_rows(csv_file_rows(path, "sensitive permission catalog"));
        tracing::debug!(path = %path.display(), entries = catalog.entries.len(), "loaded sensitive catalog");
        catalog
    }

    pub fn from_reader<R: Read>(reader: R) -> Self {
        Self::from_rows(csv_rows(reader, "<sensitive catalog>"))
    }

    fn from_rows(rows: Vec<SensitiveRow>) -> Self {
        let entries = rows
            .into_iter()
            .filter(|row| !row.policy_name.is_empty())
            .map(|row| SensitiveEntry {
                policy_name: row.policy_name,
                roles: split_multi(&row.role),
                projects: split_multi(&row.project_name),
                system_scopes: split_multi(&row.system_scope),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[SensitiveEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<SensitiveEntry> for SensitiveCatalog {
    fn from_iter<T: IntoIterator<Item = SensitiveEntry>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// ============================================================
// Role grants and project names
// ============================================================

pub fn load_role_grants(path: &Path) -> Vec<RoleGrant> {
    csv_file_rows(path, "role grant export")
}

pub fn role_grants_from_reader<R: Read>(reader: R) -> Vec<RoleGrant> {
    csv_rows(reader, "<rolegrant>")
}

/// user id → user name, and (user name, project id) → role names.
#[derive(Debug, Clone, Default)]
pub struct GrantIndex {
    user_names: HashMap<String, String>,
    roles: HashMap<(String, String), Vec<String>>,
}

impl GrantIndex {
    pub fn new(grants: &[RoleGrant]) -> Self {
        let mut index = Self::default();
        for grant in grants {
            if !grant.user_id.is_empty() && !grant.user_name.is_empty() {
                index
                    .user_names
                    .insert(grant.user_id.clone(), grant.user_name.clone());
            }
            if grant.user_name.is_empty() || grant.project_id.is_empty() || grant.role_name.is_empty()
            {
                continue;
            }
            let roles = index
                .roles
                .entry((grant.user_name.clone(), grant.project_id.clone()))
                .or_default();
            if !roles.contains(&grant.role_name) {
                roles.push(grant.role_name.clone());
            }
        }
        index
    }

    pub fn user_name(&self, user_id: &str) -> Option<&str> {
        self.user_names.get(user_id).map(String::as_str)
    }

    pub fn roles(&self, user_name: &str, project_id: &str) -> &[String] {
        self.roles
            .get(&(user_name.to_string(), project_id.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Deserialize)]
struct ProjectRow {
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    project_name: String,
}

fn project_map_from_rows(rows: Vec<ProjectRow>) -> BTreeMap<String, String> {
    rows.into_iter()
        .filter(|r| !r.project_id.is_empty() && !r.project_name.is_empty())
        .map(|r| (r.project_id, r.project_name))
        .collect()
}

/// project id → project name
pub fn load_project_map(path: &Path) -> BTreeMap<String, String> {
    project_map_from_rows(csv_file_rows(path, "project info"))
}

pub fn project_map_from_reader<R: Read>(reader: R) -> BTreeMap<String, String> {
    project_map_from_rows(csv_rows(reader, "<projectinfo>"))
}

// ============================================================
// RBAC audit log
// ============================================================

/// One row of the Keystone RBAC audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Policy id, possibly followed by a `(...)` call suffix.
    pub api: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub authorized: String,
}

impl AuditRecord {
    pub fn is_authorized(&self) -> bool {
        self.authorized.trim().eq_ignore_ascii_case("yes")
    }
}

/// Concatenate several audit logs; missing files are skipped with a warning.
pub fn load_audit_records(paths: &[PathBuf]) -> Vec<AuditRecord> {
    let mut records = Vec::new();
    for path in paths {
        records.extend(csv_file_rows::<AuditRecord>(path, "audit log"));
    }
    tracing::debug!(records = records.len(), files = paths.len(), "loaded audit log");
    records
}

pub fn audit_records_from_reader<R: Read>(reader: R) -> Vec<AuditRecord> {
    csv_rows(reader, "<audit log>")
}

// ============================================================
// Role levels
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleTier {
    High,
    Low,
}

impl RoleTier {
    pub fn key(&self) -> &'static str {
        match self {
            RoleTier::High => "high_authorized",
            RoleTier::Low => "low_authorized",
        }
    }
}

/// 高/低权限角色分级配置（role_level.json）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLevels {
    #[serde(default)]
    pub high_authorized: Vec<String>,
    #[serde(default)]
    pub low_authorized: Vec<String>,
}

impl Default for RoleLevels {
    fn default() -> Self {
        let tier = |prefix: &str| -> Vec<String> {
            ["A", "B", "C", "D", "E"]
                .iter()
                .map(|s| format!("{prefix}{s}"))
                .collect()
        };
        Self {
            high_authorized: tier("manager"),
            low_authorized: tier("member"),
        }
    }
}

impl RoleLevels {
    /// Read `path`; a missing or malformed file yields the defaults.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                unavailable(path, "role level config", e);
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(levels) => levels,
            Err(e) => {
                unavailable(path, "role level config", format!("malformed JSON: {e}"));
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("failed to write '{}'", path.display()))?;
        Ok(())
    }

    pub fn tier(&self, tier: RoleTier) -> &[String] {
        match tier {
            RoleTier::High => &self.high_authorized,
            RoleTier::Low => &self.low_authorized,
        }
    }

    fn tier_mut(&mut self, tier: RoleTier) -> &mut Vec<String> {
        match tier {
            RoleTier::High => &mut self.high_authorized,
            RoleTier::Low => &mut self.low_authorized,
        }
    }

    pub fn add(&mut self, tier: RoleTier, roles: &[String]) {
        let current = self.tier_mut(tier);
        current.extend(roles.iter().cloned());
        sort_unique(current);
    }

    pub fn remove(&mut self, tier: RoleTier, roles: &[String]) {
        let current = self.tier_mut(tier);
        current.retain(|r| !roles.contains(r));
        sort_unique(current);
    }

    pub fn set(&mut self, tier: RoleTier, roles: &[String]) {
        let current = self.tier_mut(tier);
        *current = roles.to_vec();
        sort_unique(current);
    }

    pub fn clear(&mut self, tier: RoleTier) {
        self.tier_mut(tier).clear();
    }
}

fn sort_unique(roles: &mut Vec<String>) {
    roles.sort();
    roles.dedup();
}
