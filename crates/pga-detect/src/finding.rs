//! 检测结果：按错误码区分的封闭枚举

use std::collections::BTreeMap;

use pga_policy_dsl::SourceLine;
use serde::{Deserialize, Serialize};

/// One audit finding: the offending policy lines plus what is wrong with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// `line N: <policy>` entries, one per source line (may be empty)
    pub policy_rule: Vec<String>,
    pub kind: FindingKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum FindingKind {
    /// 同一策略多行，规范化后完全相同
    #[serde(rename = "1")]
    DuplicatePolicy { target: String },
    /// 同一策略多行，规则不同
    #[serde(rename = "2")]
    DivergentPolicy { suggestion: String },
    /// 同一策略的最小匹配单元重复
    #[serde(rename = "3")]
    RepeatedUnit { unit: String, suggestion: String },
    #[serde(rename = "4")]
    WildcardRole { role: String },
    #[serde(rename = "5")]
    EmptyRule,
    #[serde(rename = "6")]
    MissingSystemScope { original_expr: String },
    #[serde(rename = "7")]
    UnrestrictedProject {
        original_expr: String,
        project_placeholder: String,
    },
    /// 敏感策略授予了允许列表之外的角色
    #[serde(rename = "8")]
    RegularRole {
        api: String,
        allowed_roles: Vec<String>,
    },
    /// 同一合取式中重复的条件
    #[serde(rename = "9")]
    RepeatedCondition { rule: String },
    /// 已调用策略中从未被观测到的规则
    #[serde(rename = "10")]
    UnusedRule { api: String, rule: String },
    /// 审计日志中从未成功调用的策略
    #[serde(rename = "11")]
    UnusedPolicy { api: String, policy: String },
    /// 低权限角色占多数，同时授予了高权限角色
    #[serde(rename = "12")]
    LowTierDominant {
        api: String,
        project_name: String,
        high_roles: Vec<String>,
        low_roles: Vec<String>,
    },
    /// 高权限角色占多数，同时授予了低权限角色
    #[serde(rename = "13")]
    HighTierDominant {
        api: String,
        project_name: String,
        low_roles: Vec<String>,
    },
}

impl Finding {
    pub fn new(policy_rule: Vec<String>, kind: FindingKind) -> Self {
        Self { policy_rule, kind }
    }

    pub fn code(&self) -> &'static str {
        match self.kind {
            FindingKind::DuplicatePolicy { .. } => "1",
            FindingKind::DivergentPolicy { .. } => "2",
            FindingKind::RepeatedUnit { .. } => "3",
            FindingKind::WildcardRole { .. } => "4",
            FindingKind::EmptyRule => "5",
            FindingKind::MissingSystemScope { .. } => "6",
            FindingKind::UnrestrictedProject { .. } => "7",
            FindingKind::RegularRole { .. } => "8",
            FindingKind::RepeatedCondition { .. } => "9",
            FindingKind::UnusedRule { .. } => "10",
            FindingKind::UnusedPolicy { .. } => "11",
            FindingKind::LowTierDominant { .. } => "12",
            FindingKind::HighTierDominant { .. } => "13",
        }
    }

    /// Template fields for the reporter. `policy_name` is always present.
    pub fn fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("policy_name".to_string(), self.policy_rule.join("\n"));
        let mut put = |key: &str, value: String| {
            fields.insert(key.to_string(), value);
        };
        match &self.kind {
            FindingKind::DuplicatePolicy { target } => put("target", target.clone()),
            FindingKind::DivergentPolicy { suggestion } => put("suggestion", suggestion.clone()),
            FindingKind::RepeatedUnit { unit, suggestion } => {
                put("fault_unit", unit.clone());
                put("suggestion", suggestion.clone());
            }
            FindingKind::WildcardRole { role } => put("fault_info", format!("role: {role}")),
            FindingKind::EmptyRule => {}
            FindingKind::MissingSystemScope { original_expr } => {
                put("original_expr", original_expr.clone());
            }
            FindingKind::UnrestrictedProject {
                original_expr,
                project_placeholder,
            } => {
                put("original_expr", original_expr.clone());
                put("project_placeholder", project_placeholder.clone());
            }
            FindingKind::RegularRole { api, allowed_roles } => {
                put(
                    "fault_info",
                    format!(
                        "Policy {api} should limit roles to [{}]",
                        allowed_roles.join(", ")
                    ),
                );
                put("api", api.clone());
            }
            FindingKind::RepeatedCondition { rule } => put("rule", rule.clone()),
            FindingKind::UnusedRule { api, rule } => {
                put("api", api.clone());
                put("rule", rule.clone());
            }
            FindingKind::UnusedPolicy { api, policy } => {
                put("api", api.clone());
                put("policy", policy.clone());
            }
            FindingKind::LowTierDominant {
                api,
                project_name,
                high_roles,
                low_roles,
            } => {
                put("api", api.clone());
                put("project_name", project_name.clone());
                put("roles", high_roles.join(","));
                put("low_roles", low_roles.join(","));
            }
            FindingKind::HighTierDominant {
                api,
                project_name,
                low_roles,
            } => {
                put("api", api.clone());
                put("project_name", project_name.clone());
                put("roles", low_roles.join(","));
            }
        }
        fields
    }
}

/// `line N: <policy>` for one source line.
pub fn policy_line(policy: &str, source: &SourceLine) -> String {
    format!("line {}: {policy}", source.line)
}

/// `(a) or (b)`; a single expression is only parenthesized.
pub fn or_combine<S: AsRef<str>>(expressions: &[S]) -> String {
    let cleaned: Vec<&str> = expressions
        .iter()
        .map(|e| e.as_ref().trim())
        .filter(|e| !e.is_empty())
        .collect();
    if cleaned.is_empty() {
        return "(policy rule missing)".to_string();
    }
    format!("({})", cleaned.join(") or ("))
}
