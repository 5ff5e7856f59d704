//! `pga explain`：单条规则表达式的规范化、布尔树与最小匹配单元

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use pga_detect::OutputFormat;
use pga_policy_dsl::{Resolver, UnitExtractor, load_policy_files, normalize, parse_expression};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Explanation {
    pub expression: String,
    pub resolved: String,
    pub normalized: String,
    pub tree: String,
    /// 最小匹配单元签名
    pub units: Vec<String>,
    pub dropped: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn explain(expr: &str, definitions: &BTreeMap<String, String>) -> Result<Explanation> {
    let mut resolver = Resolver::new(definitions);
    let resolved = resolver.resolve_expr("<expr>", expr);
    let normalized = normalize(&resolved);
    let tree = parse_expression(&normalized)
        .with_context(|| format!("failed to parse expression '{normalized}'"))?;
    let mut extractor = UnitExtractor::new("<expr>");
    let units = extractor.extract(&tree);
    Ok(Explanation {
        expression: expr.to_string(),
        resolved,
        normalized,
        tree: tree.to_string(),
        units: units.iter().map(|u| u.signature()).collect(),
        dropped: extractor.dropped().to_vec(),
        warnings: resolver.warnings().iter().map(|w| w.to_string()).collect(),
    })
}

pub fn run(expr: &str, policy_files: &[PathBuf], format: OutputFormat) -> Result<()> {
    let loaded = load_policy_files(policy_files);
    let definitions: BTreeMap<String, String> = loaded
        .records
        .into_iter()
        .map(|r| (r.key, r.expression))
        .collect();
    tracing::debug!(definitions = definitions.len(), "explaining expression");

    let explanation = explain(expr, &definitions)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&explanation)?),
        OutputFormat::Text => {
            println!("expression: {}", explanation.expression);
            if explanation.resolved != explanation.expression {
                println!("resolved:   {}", explanation.resolved);
            }
            println!("normalized: {}", explanation.normalized);
            println!("tree:       {}", explanation.tree);
            println!("minimal units ({}):", explanation.units.len());
            for unit in &explanation.units {
                println!("  {unit}");
            }
            for dropped in &explanation.dropped {
                println!("  dropped unsupported condition {dropped}");
            }
            for warning in &explanation.warnings {
                println!("  warning: {warning}");
            }
        }
    }
    Ok(())
}
