//! Expression normalizer.
//!
//! Two expressions that differ only in whitespace or in the case of their
//! `and` / `or` connectives normalize to the same text. That text is the
//! identity of a rule in the graph and the equality basis of the duplicate
//! checks.

/// Collapse whitespace runs, trim, and lowercase `and` / `or` words.
///
/// Words are found the way the parser tokenizes: whitespace-separated
/// chunks with leading `(` and trailing `)` peeled off.
pub fn normalize(expr: &str) -> String {
    expr.split_whitespace()
        .map(lowercase_connective)
        .collect::<Vec<_>>()
        .join(" ")
}

fn lowercase_connective(chunk: &str) -> String {
    let inner = chunk.trim_start_matches('(');
    let core = inner.trim_end_matches(')');
    if core.eq_ignore_ascii_case("and") || core.eq_ignore_ascii_case("or") {
        let opening = &chunk[..chunk.len() - inner.len()];
        let closing = &inner[core.len()..];
        format!("{opening}{}{closing}", core.to_ascii_lowercase())
    } else {
        chunk.to_string()
    }
}
