//! Graph-level static checks (codes 4 to 8).
//!
//! Each check is a pure pass over materialized [`PolicyView`]s; the
//! sensitive checks additionally consult the sensitive-permission catalog.
//! Findings are reported once per policy.

use std::collections::BTreeSet;

use pga_graph::{PolicyView, RuleView};

use crate::finding::{Finding, FindingKind, or_combine};
use crate::lookup::{SensitiveCatalog, SensitiveEntry};

const REQUIRES_ROLE: &str = "REQUIRES_ROLE";
const REQUIRES_PROJECT: &str = "REQUIRES_PROJECT";
const REQUIRES_SYSTEM_SCOPE: &str = "REQUIRES_SYSTEM_SCOPE";

/// Codes 4, 5, 6, 7 and 8 in that order.
pub fn run_static_checks(views: &[PolicyView], catalog: &SensitiveCatalog) -> Vec<Finding> {
    let mut findings = check_wildcard_roles(views);
    findings.extend(check_empty_rules(views));
    findings.extend(check_sensitive_scopes(views, catalog));
    findings.extend(check_sensitive_projects(views, catalog));
    findings.extend(check_sensitive_roles(views, catalog));
    tracing::debug!(
        policies = views.len(),
        catalog = catalog.entries().len(),
        findings = findings.len(),
        "static checks finished"
    );
    findings
}

/// Code 4: a rule requiring role `*`.
pub fn check_wildcard_roles(views: &[PolicyView]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for view in views {
        let wildcards: BTreeSet<&str> = view
            .rules
            .iter()
            .flat_map(|r| r.values(REQUIRES_ROLE))
            .filter(|role| role.trim() == "*")
            .collect();
        for role in wildcards {
            findings.push(Finding::new(
                view.policy.source_lines(),
                FindingKind::WildcardRole {
                    role: role.to_string(),
                },
            ));
        }
    }
    findings
}

/// Code 5: a rule without any requirement. The always-false rule `!`
/// restricts everything and is not reported.
pub fn check_empty_rules(views: &[PolicyView]) -> Vec<Finding> {
    views
        .iter()
        .filter(|view| {
            view.rules
                .iter()
                .any(|r| r.is_unconditional() && r.rule.normalized.trim() != "!")
        })
        .map(|view| Finding::new(view.policy.source_lines(), FindingKind::EmptyRule))
        .collect()
}

/// Catalog entries naming this policy that carry a value in `field`.
fn entries_for<'a>(
    view: &PolicyView,
    catalog: &'a SensitiveCatalog,
    field: fn(&SensitiveEntry) -> &[String],
) -> Vec<&'a SensitiveEntry> {
    catalog
        .entries()
        .iter()
        .filter(|e| !field(e).is_empty() && view.matches_name(&e.policy_name))
        .collect()
}

/// Allowed values from every matching entry: lowercased set plus the
/// first-seen spelling for display.
fn allow_list(
    entries: &[&SensitiveEntry],
    field: fn(&SensitiveEntry) -> &[String],
) -> (BTreeSet<String>, Vec<String>) {
    let mut allowed = BTreeSet::new();
    let mut display: Vec<String> = Vec::new();
    for entry in entries {
        for value in field(entry) {
            allowed.insert(value.to_lowercase());
            if !display.contains(value) {
                display.push(value.clone());
            }
        }
    }
    (allowed, display)
}

fn original_expr(view: &PolicyView) -> String {
    or_combine(&view.rule_expressions())
}

/// A rule fails an allow-list when it has no value of the kind, or a value
/// outside the list.
fn violates(rule: &RuleView, prefix: &str, allowed: &BTreeSet<String>) -> bool {
    let values = rule.values(prefix);
    values.is_empty() || values.iter().any(|v| !allowed.contains(&v.to_lowercase()))
}

/// Code 6: sensitive policy whose rules never require a system scope.
pub fn check_sensitive_scopes(views: &[PolicyView], catalog: &SensitiveCatalog) -> Vec<Finding> {
    let mut findings = Vec::new();
    for view in views {
        if entries_for(view, catalog, |e| e.system_scopes.as_slice()).is_empty() {
            continue;
        }
        if view.rules.iter().any(|r| r.has(REQUIRES_SYSTEM_SCOPE)) {
            continue;
        }
        findings.push(Finding::new(
            view.policy.source_lines(),
            FindingKind::MissingSystemScope {
                original_expr: original_expr(view),
            },
        ));
    }
    findings
}

/// Code 7: sensitive policy with a rule lacking a project restriction or
/// naming a project outside the allow-list.
pub fn check_sensitive_projects(views: &[PolicyView], catalog: &SensitiveCatalog) -> Vec<Finding> {
    let mut findings = Vec::new();
    for view in views {
        let entries = entries_for(view, catalog, |e| e.projects.as_slice());
        if entries.is_empty() {
            continue;
        }
        let (allowed, display) = allow_list(&entries, |e| e.projects.as_slice());
        if !view.rules.iter().any(|r| violates(r, REQUIRES_PROJECT, &allowed)) {
            continue;
        }
        let project_placeholder = display
            .first()
            .cloned()
            .unwrap_or_else(|| "%(project_id)s".to_string());
        findings.push(Finding::new(
            view.policy.source_lines(),
            FindingKind::UnrestrictedProject {
                original_expr: original_expr(view),
                project_placeholder,
            },
        ));
    }
    findings
}

/// Code 8: sensitive policy granted without a role restriction or to a
/// role outside the allow-list.
pub fn check_sensitive_roles(views: &[PolicyView], catalog: &SensitiveCatalog) -> Vec<Finding> {
    let mut findings = Vec::new();
    for view in views {
        let entries = entries_for(view, catalog, |e| e.roles.as_slice());
        let Some(first) = entries.first() else {
            continue;
        };
        let (allowed, display) = allow_list(&entries, |e| e.roles.as_slice());
        if !view.rules.iter().any(|r| violates(r, REQUIRES_ROLE, &allowed)) {
            continue;
        }
        findings.push(Finding::new(
            view.policy.source_lines(),
            FindingKind::RegularRole {
                api: first.policy_name.clone(),
                allowed_roles: display,
            },
        ));
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use pga_graph::{GraphQuery, MemoryGraph, build_policy_graph};
    use pga_policy_dsl::{compile_policy_set, parse_policy_source};

    fn views(text: &str) -> Vec<PolicyView> {
        let loaded = parse_policy_source("policy.yaml", text);
        let set = compile_policy_set(&loaded.records);
        let mut g = MemoryGraph::new();
        build_policy_graph(&mut g, &set.policy_dict()).unwrap();
        GraphQuery::new(&g).policy_views().unwrap()
    }

    fn catalog(csv: &str) -> SensitiveCatalog {
        SensitiveCatalog::from_reader(csv.as_bytes())
    }

    fn codes(findings: &[Finding]) -> Vec<&'static str> {
        findings.iter().map(Finding::code).collect()
    }

    #[test]
    fn test_wildcard_role() {
        let v = views(
            "\"identity:a\": \"role:*\"\n\
             \"identity:b\": \"role:admin\"\n",
        );
        let findings = check_wildcard_roles(&v);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].policy_rule, vec!["line 1: identity:a"]);
        assert_eq!(findings[0].fields()["fault_info"], "role: *");
    }

    #[test]
    fn test_empty_rule() {
        let v = views(
            "\"identity:a\": \"@\"\n\
             \"identity:b\": \"\"\n\
             \"identity:c\": \"role:admin\"\n\
             \"identity:d\": \"!\"\n",
        );
        let findings = check_empty_rules(&v);
        let lines: Vec<_> = findings.iter().map(|f| f.policy_rule[0].as_str()).collect();
        assert_eq!(lines, vec!["line 1: identity:a", "line 2: identity:b"]);
    }

    #[test]
    fn test_sensitive_scope() {
        let v = views(
            "\"identity:create_user\": \"role:admin\"\n\
             \"identity:delete_user\": \"role:admin and system_scope:all\"\n",
        );
        let c = catalog(
            "policy_name,role,project_name,system_scope\n\
             create_user,,,all\n\
             identity:delete_user,,,all\n",
        );
        let findings = check_sensitive_scopes(&v, &c);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].kind,
            FindingKind::MissingSystemScope {
                original_expr: "(role:admin)".into()
            }
        );
    }

    #[test]
    fn test_sensitive_projects() {
        let v = views(
            "\"identity:a\": \"role:admin and project_id:demo\"\n\
             \"identity:b\": \"role:admin and project_id:other\"\n\
             \"identity:c\": \"role:admin\"\n",
        );
        let c = catalog(
            "policy_name,role,project_name,system_scope\n\
             identity:a,,Demo,\n\
             identity:b,,demo|ops,\n\
             identity:c,,ops,\n",
        );
        let findings = check_sensitive_projects(&v, &c);
        let lines: Vec<_> = findings.iter().map(|f| f.policy_rule[0].as_str()).collect();
        assert_eq!(lines, vec!["line 2: identity:b", "line 3: identity:c"]);
        assert_eq!(findings[1].fields()["project_placeholder"], "ops");
    }

    #[test]
    fn test_sensitive_roles() {
        let v = views(
            "\"identity:a\": \"role:admin or role:member\"\n\
             \"identity:b\": \"role:admin\"\n\
             \"identity:c\": \"project_id:p1\"\n",
        );
        let c = catalog(
            "policy_name,role,project_name,system_scope\n\
             identity:a,admin,,\n\
             b,ADMIN,,\n\
             c,admin,,\n",
        );
        let findings = check_sensitive_roles(&v, &c);
        assert_eq!(codes(&findings), vec!["8", "8"]);
        assert_eq!(
            findings[0].kind,
            FindingKind::RegularRole {
                api: "identity:a".into(),
                allowed_roles: vec!["admin".into()]
            }
        );
        assert_eq!(findings[1].policy_rule, vec!["line 3: identity:c"]);
    }

    #[test]
    fn test_run_order_and_empty_catalog() {
        let v = views(
            "\"identity:a\": \"role:*\"\n\
             \"identity:b\": \"@\"\n",
        );
        let findings = run_static_checks(&v, &SensitiveCatalog::default());
        assert_eq!(codes(&findings), vec!["4", "5"]);
    }
}
