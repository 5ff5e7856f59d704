//! Policy file loading.
//!
//! One line scanner handles the three layouts found in the field: YAML flat
//! maps, `key: "expr"` lines and JSON objects written one entry per line.
//! Every entry keeps its file and line so duplicate keys can be reported
//! against the exact source location.

use std::fmt;
use std::path::{Path, PathBuf};

use pga_common::PgaError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLine {
    pub file: String,
    /// 1-based
    pub line: usize,
}

impl fmt::Display for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One `key → expression` entry as written in a policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub key: String,
    pub expression: String,
    pub source: SourceLine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLine {
    pub source: SourceLine,
    pub text: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedPolicies {
    pub records: Vec<PolicyRecord>,
    pub skipped: Vec<SkippedLine>,
}

impl LoadedPolicies {
    pub fn extend(&mut self, other: LoadedPolicies) {
        self.records.extend(other.records);
        self.skipped.extend(other.skipped);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read and scan a single policy file.
pub fn load_policy_file(path: &Path) -> Result<LoadedPolicies, PgaError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PgaError::PolicyFormat(format!("failed to read policy file '{}': {e}", path.display()))
    })?;
    let loaded = parse_policy_source(&path.display().to_string(), &text);
    tracing::info!(
        file = %path.display(),
        entries = loaded.records.len(),
        skipped = loaded.skipped.len(),
        "loaded policy file"
    );
    Ok(loaded)
}

/// Load several files in order. Unreadable files are skipped with a warning.
pub fn load_policy_files(paths: &[PathBuf]) -> LoadedPolicies {
    let mut all = LoadedPolicies::default();
    for path in paths {
        match load_policy_file(path) {
            Ok(loaded) => all.extend(loaded),
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping policy file"),
        }
    }
    all
}

struct Pending {
    key: String,
    raw_value: String,
    source: SourceLine,
}

/// Scan policy text. `file` is only used to label source lines.
pub fn parse_policy_source(file: &str, text: &str) -> LoadedPolicies {
    let mut loaded = LoadedPolicies::default();
    let mut pending: Option<Pending> = None;
    let mut json_mode = false;
    let mut seen_content = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let source = SourceLine {
            file: file.to_string(),
            line: idx + 1,
        };
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed == "---" {
            continue;
        }
        if !seen_content {
            seen_content = true;
            json_mode = trimmed.starts_with('{');
        }
        if matches!(trimmed, "{" | "}" | "}," | "{}") {
            continue;
        }

        let indented = raw_line.starts_with(char::is_whitespace);
        if !json_mode
            && indented
            && let Some(p) = pending.as_mut()
        {
            p.raw_value.push(' ');
            p.raw_value.push_str(trimmed);
            continue;
        }

        if let Some(done) = pending.take() {
            finish(done, &mut loaded);
        }

        let entry = if json_mode {
            trimmed.strip_suffix(',').unwrap_or(trimmed).trim_end()
        } else {
            trimmed
        };
        match split_entry(entry) {
            Some((key, value)) if !key.is_empty() => {
                pending = Some(Pending {
                    key,
                    raw_value: value.to_string(),
                    source,
                });
            }
            Some(_) => skip(&mut loaded, source, trimmed, "empty policy key"),
            None => skip(&mut loaded, source, trimmed, "no key/value separator"),
        }
    }
    if let Some(done) = pending.take() {
        finish(done, &mut loaded);
    }
    loaded
}

fn skip(loaded: &mut LoadedPolicies, source: SourceLine, text: &str, reason: &str) {
    tracing::warn!(%source, line_text = %text, reason, "skipping malformed policy line");
    loaded.skipped.push(SkippedLine {
        source,
        text: text.to_string(),
        reason: reason.to_string(),
    });
}

fn finish(pending: Pending, loaded: &mut LoadedPolicies) {
    loaded.records.push(PolicyRecord {
        key: pending.key,
        expression: unquote_value(pending.raw_value.trim()),
        source: pending.source,
    });
}

/// Split `key: value` at the first unquoted colon followed by whitespace or
/// end of line, else at the first unquoted colon.
fn split_entry(line: &str) -> Option<(String, &str)> {
    let mut first_colon = None;
    let mut spaced_colon = None;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = line.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' && q == '"' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            ':' => {
                first_colon.get_or_insert(i);
                let next_is_space = chars.peek().is_none_or(|(_, n)| n.is_whitespace());
                if next_is_space {
                    spaced_colon = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let at = spaced_colon.or(first_colon)?;
    let key = unquote_key(line[..at].trim());
    Some((key, line[at + 1..].trim()))
}

fn unquote_key(key: &str) -> String {
    strip_matching_quotes(key).unwrap_or(key).to_string()
}

fn strip_matching_quotes(text: &str) -> Option<&str> {
    ['"', '\''].into_iter().find_map(|q| {
        text.strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}

/// Quoted values follow YAML scalar rules; plain values lose a trailing
/// ` # comment`.
fn unquote_value(raw: &str) -> String {
    if raw.starts_with('"') || raw.starts_with('\'') {
        if let Ok(value) = serde_yaml::from_str::<String>(raw) {
            return value;
        }
        return strip_matching_quotes(raw).unwrap_or(raw).to_string();
    }
    match raw.find(" #") {
        Some(pos) => raw[..pos].trim_end().to_string(),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> LoadedPolicies {
        parse_policy_source("policy.yaml", text)
    }

    #[test]
    fn test_yaml_flat_map() {
        let loaded = scan(
            "# Keystone policy overrides\n\
             \"identity:get_user\": \"role:reader and system_scope:all\"\n\
             'identity:create_user': 'role:admin'\n\
             admin_required: role:admin or is_admin:1\n",
        );
        assert!(loaded.skipped.is_empty());
        let keys: Vec<_> = loaded.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["identity:get_user", "identity:create_user", "admin_required"]);
        assert_eq!(loaded.records[0].expression, "role:reader and system_scope:all");
        assert_eq!(loaded.records[0].source.line, 2);
        assert_eq!(loaded.records[2].expression, "role:admin or is_admin:1");
    }

    #[test]
    fn test_unquoted_key_with_colon() {
        let loaded = scan("identity:list_users: role:reader\n");
        assert_eq!(loaded.records[0].key, "identity:list_users");
        assert_eq!(loaded.records[0].expression, "role:reader");
    }

    #[test]
    fn test_quoted_colon_does_not_split() {
        let loaded = scan("\"a:b\":\"role:x\"\n");
        assert_eq!(loaded.records[0].key, "a:b");
        assert_eq!(loaded.records[0].expression, "role:x");
    }

    #[test]
    fn test_json_lines() {
        let loaded = scan(
            "{\n    \"identity:get_user\": \"role:reader\",\n    \"identity:delete_user\": \"\"\n}\n",
        );
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].expression, "role:reader");
        assert_eq!(loaded.records[1].key, "identity:delete_user");
        assert_eq!(loaded.records[1].expression, "");
        assert_eq!(loaded.records[1].source.line, 3);
    }

    #[test]
    fn test_continuation_line() {
        let loaded = scan(
            "\"identity:update_user\": \"role:admin and\n    system_scope:all\"\n\"identity:get_user\": \"@\"\n",
        );
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].expression, "role:admin and system_scope:all");
        assert_eq!(loaded.records[1].expression, "@");
    }

    #[test]
    fn test_duplicate_keys_kept() {
        let loaded = scan("\"a:b\": \"role:x\"\n\"a:b\": \"role:x\"\n");
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[1].source.line, 2);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let loaded = scan("this line has no separator\n\"ok:policy\": \"role:x\"\n");
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.skipped.len(), 1);
        assert_eq!(loaded.skipped[0].source.line, 1);
    }

    #[test]
    fn test_trailing_comment_on_plain_value() {
        let loaded = scan("identity:get_user: role:reader # read only\n");
        assert_eq!(loaded.records[0].expression, "role:reader");
    }

    #[test]
    fn test_load_policy_files_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, "\"identity:get_user\": \"role:reader\"\n").unwrap();

        let loaded = load_policy_files(&[dir.path().join("missing.yaml"), path]);
        assert_eq!(loaded.records.len(), 1);
        assert!(loaded.records[0].source.file.ends_with("policy.yaml"));
    }
}
