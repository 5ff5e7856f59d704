//! Source-level duplicate checks (codes 1, 2, 3 and 9).
//!
//! These run on the compiled policy set rather than the graph: the graph
//! merges identical rules, so the duplicated source lines are only visible
//! before the build.

use std::collections::BTreeMap;

use pga_policy_dsl::{CompiledPolicy, CompiledPolicySet};

use crate::finding::{Finding, FindingKind, or_combine, policy_line};

pub fn check_duplicates(set: &CompiledPolicySet) -> Vec<Finding> {
    let mut findings = Vec::new();
    for policy in &set.policies {
        findings.extend(duplicate_policy(policy));
        findings.extend(repeated_units(policy));
        findings.extend(repeated_conditions(policy));
    }
    tracing::debug!(
        policies = set.policies.len(),
        findings = findings.len(),
        "duplicate checks finished"
    );
    findings
}

fn all_lines(policy: &CompiledPolicy) -> Vec<String> {
    policy
        .expressions
        .iter()
        .map(|e| policy_line(&policy.key, &e.source))
        .collect()
}

/// Code 1 when every line of a repeated key normalizes identically,
/// code 2 otherwise.
fn duplicate_policy(policy: &CompiledPolicy) -> Option<Finding> {
    if policy.expressions.len() < 2 {
        return None;
    }
    let distinct = policy.distinct_normalized();
    let kind = if distinct.len() == 1 {
        let target = policy.expressions[1..]
            .iter()
            .map(|e| policy_line(&policy.key, &e.source))
            .collect::<Vec<_>>()
            .join(", ");
        FindingKind::DuplicatePolicy { target }
    } else {
        FindingKind::DivergentPolicy {
            suggestion: or_combine(&distinct),
        }
    };
    Some(Finding::new(all_lines(policy), kind))
}

/// Code 3: a minimal-unit signature produced more than once across the
/// policy's distinct expressions.
fn repeated_units(policy: &CompiledPolicy) -> Vec<Finding> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for normalized in policy.distinct_normalized() {
        let Some(expr) = policy.expressions.iter().find(|e| e.normalized == normalized) else {
            continue;
        };
        for unit in &expr.units {
            let signature = unit.signature();
            let count = counts.entry(signature.clone()).or_insert(0);
            if *count == 0 {
                order.push(signature);
            }
            *count += 1;
        }
    }

    let suggestion = or_combine(&order);
    order
        .iter()
        .filter(|sig| counts.get(*sig).is_some_and(|&c| c > 1))
        .map(|sig| {
            Finding::new(
                all_lines(policy),
                FindingKind::RepeatedUnit {
                    unit: sig.clone(),
                    suggestion: suggestion.clone(),
                },
            )
        })
        .collect()
}

/// Code 9: the same condition twice inside one conjunction.
fn repeated_conditions(policy: &CompiledPolicy) -> Vec<Finding> {
    let mut findings = Vec::new();
    for normalized in policy.distinct_normalized() {
        let lines: Vec<String> = policy
            .expressions
            .iter()
            .filter(|e| e.normalized == normalized)
            .map(|e| policy_line(&policy.key, &e.source))
            .collect();
        let Some(expr) = policy.expressions.iter().find(|e| e.normalized == normalized) else {
            continue;
        };
        for repeated in expr.tree.repeated_conjuncts() {
            findings.push(Finding::new(
                lines.clone(),
                FindingKind::RepeatedCondition {
                    rule: repeated.to_string(),
                },
            ));
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use pga_policy_dsl::{compile_policy_set, parse_policy_source};

    fn check(text: &str) -> Vec<Finding> {
        let loaded = parse_policy_source("policy.yaml", text);
        check_duplicates(&compile_policy_set(&loaded.records))
    }

    #[test]
    fn test_identical_lines_code_1() {
        let findings = check(
            "\"identity:list_users\": \"role:reader and system_scope:all\"\n\
             \"identity:list_users\": \"role:reader and system_scope:all\"\n",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code(), "1");
        assert_eq!(
            findings[0].kind,
            FindingKind::DuplicatePolicy {
                target: "line 2: identity:list_users".into()
            }
        );
        assert_eq!(findings[0].policy_rule.len(), 2);
    }

    #[test]
    fn test_formatting_only_difference_is_code_1() {
        let findings = check(
            "\"identity:a\": \"role:x   AND role:y\"\n\
             \"identity:a\": \"role:x and role:y\"\n",
        );
        assert_eq!(findings[0].code(), "1");
    }

    #[test]
    fn test_different_lines_code_2() {
        let findings = check(
            "\"identity:get_user\": \"role:reader\"\n\
             \"identity:get_user\": \"role:admin\"\n",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].kind,
            FindingKind::DivergentPolicy {
                suggestion: "(role:reader) or (role:admin)".into()
            }
        );
    }

    #[test]
    fn test_repeated_unit_code_3() {
        let findings = check(
            "\"identity:a\": \"(role:x and project_id:p) or (project_id:p and role:x) or role:y\"\n",
        );
        let codes: Vec<_> = findings.iter().map(Finding::code).collect();
        assert_eq!(codes, vec!["3"]);
        match &findings[0].kind {
            FindingKind::RepeatedUnit { unit, suggestion } => {
                assert_eq!(unit, "project:p and role:x");
                assert_eq!(suggestion, "(project:p and role:x) or (role:y)");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_repeated_condition_code_9() {
        let findings = check("\"identity:a\": \"role:admin and role:admin\"\n");
        let nine: Vec<_> = findings.iter().filter(|f| f.code() == "9").collect();
        assert_eq!(nine.len(), 1);
        assert_eq!(
            nine[0].kind,
            FindingKind::RepeatedCondition {
                rule: "role:admin".into()
            }
        );
        assert_eq!(nine[0].policy_rule, vec!["line 1: identity:a"]);
    }

    #[test]
    fn test_clean_policy_has_no_findings() {
        assert!(check("\"identity:a\": \"role:admin or role:reader\"\n").is_empty());
    }
}
