//! `rule:<name>` reference expansion.
//!
//! A reference is replaced by the parenthesized, recursively resolved
//! expression of the named entry. Cycles, missing names and nesting deeper
//! than [`MAX_RESOLVE_DEPTH`] leave the reference text in place and record a
//! [`ResolveWarning`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub const MAX_RESOLVE_DEPTH: usize = 50;

const RULE_PREFIX: &str = "rule:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    Cycle { policy: String, reference: String },
    Missing { policy: String, reference: String },
    DepthExceeded { policy: String, depth: usize },
}

impl ResolveWarning {
    pub fn policy(&self) -> &str {
        match self {
            ResolveWarning::Cycle { policy, .. }
            | ResolveWarning::Missing { policy, .. }
            | ResolveWarning::DepthExceeded { policy, .. } => policy,
        }
    }
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveWarning::Cycle { policy, reference } => {
                write!(f, "circular reference to 'rule:{reference}' while resolving '{policy}'")
            }
            ResolveWarning::Missing { policy, reference } => {
                write!(f, "'{policy}' references undefined rule 'rule:{reference}'")
            }
            ResolveWarning::DepthExceeded { policy, depth } => {
                write!(f, "reference nesting deeper than {depth} while resolving '{policy}'")
            }
        }
    }
}

/// Stateful resolver over a fixed definition table.
///
/// Cleanly resolved names are memoized; a name whose expansion produced any
/// warning is recomputed on every use so each occurrence is reported.
pub struct Resolver<'a> {
    definitions: &'a BTreeMap<String, String>,
    cache: HashMap<String, String>,
    stack: Vec<String>,
    warnings: Vec<ResolveWarning>,
}

impl<'a> Resolver<'a> {
    pub fn new(definitions: &'a BTreeMap<String, String>) -> Self {
        Self {
            definitions,
            cache: HashMap::new(),
            stack: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Expand all references in `expr`, which is the expression of `owner`.
    ///
    /// `owner` sits on the resolution stack while expanding, so an
    /// expression that refers back to its own policy is reported as a cycle.
    pub fn resolve_expr(&mut self, owner: &str, expr: &str) -> String {
        if !contains_reference(expr) {
            return expr.to_string();
        }
        self.stack.push(owner.to_string());
        let resolved = self.expand(expr, 0);
        self.stack.pop();
        resolved
    }

    pub fn warnings(&self) -> &[ResolveWarning] {
        &self.warnings
    }

    fn current_policy(&self) -> String {
        self.stack.first().cloned().unwrap_or_default()
    }

    fn warn(&mut self, warning: ResolveWarning) {
        tracing::warn!(policy = %warning.policy(), "{warning}");
        self.warnings.push(warning);
    }

    fn expand(&mut self, expr: &str, depth: usize) -> String {
        if depth > MAX_RESOLVE_DEPTH {
            let policy = self.current_policy();
            self.warn(ResolveWarning::DepthExceeded {
                policy,
                depth: MAX_RESOLVE_DEPTH,
            });
            return expr.to_string();
        }

        let mut out = String::with_capacity(expr.len());
        let mut cursor = 0;
        while let Some((start, name_start, end)) = next_reference(expr, cursor) {
            out.push_str(&expr[cursor..start]);
            let name = &expr[name_start..end];
            match self.expand_name(name, depth + 1) {
                Some(text) => {
                    out.push('(');
                    out.push_str(&text);
                    out.push(')');
                }
                None => out.push_str(&expr[start..end]),
            }
            cursor = end;
        }
        out.push_str(&expr[cursor..]);
        out
    }

    fn expand_name(&mut self, name: &str, depth: usize) -> Option<String> {
        if let Some(cached) = self.cache.get(name) {
            return Some(cached.clone());
        }
        if self.stack.iter().any(|active| active == name) {
            let policy = self.current_policy();
            self.warn(ResolveWarning::Cycle {
                policy,
                reference: name.to_string(),
            });
            return None;
        }
        let Some(raw) = self.definitions.get(name) else {
            let policy = self.current_policy();
            self.warn(ResolveWarning::Missing {
                policy,
                reference: name.to_string(),
            });
            return None;
        };

        let warnings_before = self.warnings.len();
        self.stack.push(name.to_string());
        let text = self.expand(raw, depth);
        self.stack.pop();
        if self.warnings.len() == warnings_before {
            self.cache.insert(name.to_string(), text.clone());
        }
        Some(text)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn contains_reference(expr: &str) -> bool {
    next_reference(expr, 0).is_some()
}

/// Locate the next `rule:<word>` token at or after `from`.
///
/// Returns `(token_start, name_start, name_end)` byte offsets. The token
/// must start at a word boundary and carry a non-empty name.
fn next_reference(expr: &str, from: usize) -> Option<(usize, usize, usize)> {
    let mut search = from;
    while let Some(offset) = expr[search..].find(RULE_PREFIX) {
        let start = search + offset;
        let name_start = start + RULE_PREFIX.len();
        let at_boundary = expr[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_word_char(c));
        let name_len: usize = expr[name_start..]
            .chars()
            .take_while(|c| is_word_char(*c))
            .map(char::len_utf8)
            .sum();
        if at_boundary && name_len > 0 {
            return Some((start, name_start, name_start + name_len));
        }
        search = name_start;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Resolved {
        expressions: BTreeMap<String, String>,
        warnings: Vec<ResolveWarning>,
    }

    /// Resolve every entry of `policies` against the set itself.
    fn resolve(policies: &BTreeMap<String, String>) -> Resolved {
        let mut resolver = Resolver::new(policies);
        let expressions = policies
            .iter()
            .map(|(name, raw)| (name.clone(), resolver.resolve_expr(name, raw)))
            .collect();
        Resolved {
            expressions,
            warnings: resolver.warnings().to_vec(),
        }
    }

    fn defs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_no_references_is_fixpoint() {
        let input = defs(&[
            ("identity:get_user", "role:reader"),
            ("identity:create_user", "role:admin and system_scope:all"),
        ]);
        let resolved = resolve(&input);
        assert_eq!(resolved.expressions, input);
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_simple_reference() {
        let resolved = resolve(&defs(&[("a", "rule:b"), ("b", "role:admin")]));
        assert_eq!(resolved.expressions["a"], "(role:admin)");
        assert_eq!(resolved.expressions["b"], "role:admin");
    }

    #[test]
    fn test_nested_reference() {
        let resolved = resolve(&defs(&[
            ("admin_required", "role:admin or is_admin:1"),
            ("owner", "user_id:%(user_id)s"),
            ("admin_or_owner", "rule:admin_required or rule:owner"),
            ("identity:get_user", "rule:admin_or_owner"),
        ]));
        assert_eq!(
            resolved.expressions["identity:get_user"],
            "((role:admin or is_admin:1) or (user_id:%(user_id)s))"
        );
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_cycle_terminates_with_warning() {
        let resolved = resolve(&defs(&[("a", "rule:b"), ("b", "rule:a")]));
        assert!(resolved.expressions["a"].contains("rule:"));
        assert!(resolved.expressions["b"].contains("rule:"));
        assert!(
            resolved
                .warnings
                .iter()
                .any(|w| matches!(w, ResolveWarning::Cycle { .. }))
        );
    }

    #[test]
    fn test_self_reference() {
        let resolved = resolve(&defs(&[("a", "role:x or rule:a")]));
        assert_eq!(resolved.expressions["a"], "role:x or rule:a");
        assert_eq!(
            resolved.warnings,
            vec![ResolveWarning::Cycle {
                policy: "a".into(),
                reference: "a".into()
            }]
        );
    }

    #[test]
    fn test_missing_reference_left_literal() {
        let resolved = resolve(&defs(&[("a", "rule:nowhere and role:admin")]));
        assert_eq!(resolved.expressions["a"], "rule:nowhere and role:admin");
        assert_eq!(
            resolved.warnings,
            vec![ResolveWarning::Missing {
                policy: "a".into(),
                reference: "nowhere".into()
            }]
        );
    }

    #[test]
    fn test_depth_guard() {
        let mut pairs: Vec<(String, String)> = (0..60)
            .map(|i| (format!("r{i}"), format!("rule:r{}", i + 1)))
            .collect();
        pairs.push(("r60".into(), "role:admin".into()));
        let input: BTreeMap<String, String> = pairs.into_iter().collect();

        let mut resolver = Resolver::new(&input);
        let out = resolver.resolve_expr("r0", "rule:r1");
        assert!(out.contains("rule:"));
        assert!(
            resolver
                .warnings()
                .iter()
                .any(|w| matches!(w, ResolveWarning::DepthExceeded { .. }))
        );
    }

    #[test]
    fn test_reference_needs_word_boundary() {
        let input = defs(&[("b", "role:admin")]);
        let mut resolver = Resolver::new(&input);
        assert_eq!(resolver.resolve_expr("x", "subrule:b"), "subrule:b");
        assert_eq!(resolver.resolve_expr("x", "(rule:b)"), "((role:admin))");
        assert!(resolver.warnings().is_empty());
    }
}
