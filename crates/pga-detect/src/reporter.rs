//! Finding formatter.
//!
//! Every finding code maps to a fixed template (`fault type`, `fault policy
//! rule`, `fault info`, `recommendation`). Template errors are converted
//! into a fallback line and never abort the run; output errors are logged.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::finding::{Finding, FindingKind};

pub const DEFAULT_MESSAGE: &str = "read n policy rules, all Meet configure safety baseline";

const SEPARATOR_WIDTH: usize = 40;

struct Template {
    fault_type: &'static str,
    fault_info: &'static str,
    recommendation: &'static str,
    /// Append the repeated `{fault_unit}` after the fault info.
    unit_suffix: bool,
}

const fn template(
    fault_type: &'static str,
    fault_info: &'static str,
    recommendation: &'static str,
) -> Template {
    Template {
        fault_type,
        fault_info,
        recommendation,
        unit_suffix: false,
    }
}

const DUPLICATE_POLICY: Template =
    template("repeat policy", "Repeat with same rule", "delete {target}");
const DIVERGENT_POLICY: Template = template(
    "repeat policy",
    "Repeat with different rules",
    "combine 2 rule into {suggestion}",
);
const REPEATED_UNIT: Template = Template {
    unit_suffix: true,
    ..template("repeat rule", "rules repeat", "combine 2 rule into {suggestion}")
};
const WILDCARD_ROLE: Template =
    template("allow all role", "{fault_info}", "setting role restriction");
const EMPTY_RULE: Template = template(
    "No rule",
    "not setting policy rule",
    "[Warning] setting role restriction",
);
const MISSING_SYSTEM_SCOPE: Template = template(
    "Scope has no restriction",
    "system scope should setting all",
    "{original_expr} and system_scope:all",
);
const UNRESTRICTED_PROJECT: Template = template(
    "project has no restriction",
    "project should setting",
    "{original_expr} and project_id:{project_placeholder}",
);
const REGULAR_ROLE: Template = template(
    "{api} privileges to regular role",
    "{fault_info}",
    "Warning: Not set the role into regular role",
);
const REPEATED_CONDITION: Template = template(
    "Repeat Condition",
    "Delete Repeat Condition",
    "{rule} should be delete",
);
const UNUSED_RULE: Template = template(
    "Role or Scope Over Authorization",
    "{api} is not being used by the assigned Role/ in the assigned Scope",
    "Delete the {rule}",
);
const UNUSED_POLICY: Template = template(
    "API Over Authorization",
    "{api} is never used",
    "Delete the {policy}",
);
const LOW_TIER_DOMINANT: Template = template(
    "high privilege role granted in low privilege api",
    "{api} in project {project_name} is mostly granted to low authorized roles [{low_roles}]",
    "check whether roles [{roles}] should be granted {api}",
);
const HIGH_TIER_DOMINANT: Template = template(
    "low privilege role granted in high privilege api",
    "{api} in project {project_name} is mostly granted to high authorized roles",
    "remove roles [{roles}] from {api}",
);

fn template_for(kind: &FindingKind) -> &'static Template {
    match kind {
        FindingKind::DuplicatePolicy { .. } => &DUPLICATE_POLICY,
        FindingKind::DivergentPolicy { .. } => &DIVERGENT_POLICY,
        FindingKind::RepeatedUnit { .. } => &REPEATED_UNIT,
        FindingKind::WildcardRole { .. } => &WILDCARD_ROLE,
        FindingKind::EmptyRule => &EMPTY_RULE,
        FindingKind::MissingSystemScope { .. } => &MISSING_SYSTEM_SCOPE,
        FindingKind::UnrestrictedProject { .. } => &UNRESTRICTED_PROJECT,
        FindingKind::RegularRole { .. } => &REGULAR_ROLE,
        FindingKind::RepeatedCondition { .. } => &REPEATED_CONDITION,
        FindingKind::UnusedRule { .. } => &UNUSED_RULE,
        FindingKind::UnusedPolicy { .. } => &UNUSED_POLICY,
        FindingKind::LowTierDominant { .. } => &LOW_TIER_DOMINANT,
        FindingKind::HighTierDominant { .. } => &HIGH_TIER_DOMINANT,
    }
}

/// Loose string codes, as handed to [`Reporter::report_fields`].
fn template_for_code(code: &str) -> Option<&'static Template> {
    let template = match code {
        "1" => &DUPLICATE_POLICY,
        "2" => &DIVERGENT_POLICY,
        "3" => &REPEATED_UNIT,
        "4" => &WILDCARD_ROLE,
        "5" => &EMPTY_RULE,
        "6" => &MISSING_SYSTEM_SCOPE,
        "7" => &UNRESTRICTED_PROJECT,
        "8" => &REGULAR_ROLE,
        "9" => &REPEATED_CONDITION,
        "10" => &UNUSED_RULE,
        "11" => &UNUSED_POLICY,
        "12" => &LOW_TIER_DOMINANT,
        "13" => &HIGH_TIER_DOMINANT,
        _ => return None,
    };
    Some(template)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("[Unknown Code {0}] {default}", default = DEFAULT_MESSAGE)]
    UnknownCode(String),
    #[error(
        "[Invalid Data] code={code} missing field '{field}', fallback: {default}",
        default = DEFAULT_MESSAGE
    )]
    MissingField { code: String, field: String },
}

/// Substitute `{name}` placeholders; an absent or empty field is an error.
fn fill(code: &str, text: &str, fields: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let name = &after[..close];
        match fields.get(name).filter(|v| !v.trim().is_empty()) {
            Some(value) => out.push_str(value),
            None => {
                return Err(TemplateError::MissingField {
                    code: code.to_string(),
                    field: name.to_string(),
                });
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

// ============================================================
// Rendered output
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportBlock {
    pub code: String,
    pub fault_type: String,
    pub policy_rule: Vec<String>,
    pub fault_info: String,
    pub recommendation: String,
}

impl ReportBlock {
    /// Fill the template of `code` with `fields`.
    pub fn render(code: &str, fields: &BTreeMap<String, String>) -> Result<Self, TemplateError> {
        let template =
            template_for_code(code).ok_or_else(|| TemplateError::UnknownCode(code.to_string()))?;
        Self::fill_template(template, code, fields)
    }

    pub fn for_finding(finding: &Finding) -> Result<Self, TemplateError> {
        Self::fill_template(template_for(&finding.kind), finding.code(), &finding.fields())
    }

    fn fill_template(
        template: &Template,
        code: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<Self, TemplateError> {
        let mut fault_info = fill(code, template.fault_info, fields)?;
        if template.unit_suffix
            && let Some(unit) = fields.get("fault_unit").filter(|u| !u.is_empty())
        {
            fault_info.push_str(&format!(" {{{unit}}}"));
        }
        let policy_rule = fields
            .get("policy_name")
            .map(|p| {
                p.lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            code: code.to_string(),
            fault_type: fill(code, template.fault_type, fields)?,
            policy_rule,
            fault_info,
            recommendation: fill(code, template.recommendation, fields)?,
        })
    }
}

impl fmt::Display for ReportBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fault type: {}", self.fault_type)?;
        writeln!(f, "fault policy rule:")?;
        if self.policy_rule.is_empty() {
            writeln!(f, "  (无)")?;
        }
        for line in &self.policy_rule {
            writeln!(f, "  {line}")?;
        }
        writeln!(f, "fault info: {}", self.fault_info)?;
        writeln!(f, "recommendation: {}", self.recommendation)?;
        write!(f, "{}", "-".repeat(SEPARATOR_WIDTH))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum ReportEntry {
    Block(ReportBlock),
    Fallback { code: String, message: String },
}

/// 输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{other}' (expected text or json)")),
        }
    }
}

/// `read <n> policy rules, all Meet configure safety baseline`
pub fn summary_line(rules_read: usize) -> String {
    DEFAULT_MESSAGE.replacen(" n ", &format!(" {rules_read} "), 1)
}

// ============================================================
// Reporter
// ============================================================

pub struct Reporter<W: Write> {
    out: W,
    format: OutputFormat,
    entries: Vec<ReportEntry>,
    blocks: usize,
    fallbacks: usize,
}

impl Reporter<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            entries: Vec::new(),
            blocks: 0,
            fallbacks: 0,
        }
    }

    pub fn report(&mut self, finding: &Finding) {
        self.record(finding.code(), ReportBlock::for_finding(finding));
    }

    pub fn report_all<'a>(&mut self, findings: impl IntoIterator<Item = &'a Finding>) {
        for finding in findings {
            self.report(finding);
        }
    }

    /// Report a finding given as a string code plus loose fields.
    pub fn report_fields(&mut self, code: &str, fields: &BTreeMap<String, String>) {
        self.record(code, ReportBlock::render(code, fields));
    }

    fn record(&mut self, code: &str, rendered: Result<ReportBlock, TemplateError>) {
        match rendered {
            Ok(block) => {
                self.blocks += 1;
                match self.format {
                    OutputFormat::Text => {
                        let text = block.to_string();
                        self.emit(&text);
                    }
                    OutputFormat::Json => self.entries.push(ReportEntry::Block(block)),
                }
            }
            Err(e) => {
                tracing::warn!(code, error = %e, "finding could not be formatted");
                self.fallbacks += 1;
                match self.format {
                    OutputFormat::Text => self.emit(&e.to_string()),
                    OutputFormat::Json => self.entries.push(ReportEntry::Fallback {
                        code: code.to_string(),
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    /// Finding blocks emitted so far.
    pub fn findings(&self) -> usize {
        self.blocks
    }

    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    /// Flush pending output. In text mode a run without any output prints
    /// the baseline summary; in JSON mode the collected array is written.
    pub fn finish(mut self, rules_read: usize) -> W {
        match self.format {
            OutputFormat::Text => {
                if self.blocks == 0 && self.fallbacks == 0 {
                    let line = summary_line(rules_read);
                    self.emit(&line);
                }
            }
            OutputFormat::Json => {
                let entries = std::mem::take(&mut self.entries);
                match serde_json::to_string_pretty(&entries) {
                    Ok(json) => self.emit(&json),
                    Err(e) => tracing::warn!(error = %e, "failed to serialize findings"),
                }
            }
        }
        if let Err(e) = self.out.flush() {
            tracing::warn!(error = %e, "failed to flush report output");
        }
        self.out
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{text}") {
            tracing::warn!(error = %e, "failed to write report output");
        }
    }
}
