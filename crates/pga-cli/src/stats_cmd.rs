//! `pga stats`：策略图统计

use anyhow::Result;
use pga_detect::OutputFormat;
use pga_graph::{GraphQuery, GraphStatistics};
use serde::Serialize;

use crate::build_cmd::{BuildRecord, LAST_BUILD_KEY};
use crate::config::Config;

#[derive(Debug, Serialize)]
struct StatsReport {
    fingerprint: String,
    statistics: GraphStatistics,
    last_build: Option<BuildRecord>,
}

pub fn run(config: &Config, format: OutputFormat) -> Result<()> {
    let graph = config.open_store()?;
    let query = GraphQuery::new(&graph);
    let report = StatsReport {
        fingerprint: query.fingerprint()?,
        statistics: query.statistics()?,
        last_build: graph.get_metadata(LAST_BUILD_KEY)?,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

fn print_text(report: &StatsReport) {
    let stats = &report.statistics;
    println!("Policy nodes:    {}", stats.policy_nodes);
    for (label, count) in &stats.policy_types {
        println!("  {label}: {count}");
    }
    println!("Rule nodes:      {}", stats.rule_nodes);
    println!("Condition nodes: {}", stats.condition_nodes);
    for (kind, count) in &stats.condition_types {
        println!("  {kind}: {count}");
    }
    println!("HAS_RULE:        {}", stats.has_rule_relationships);
    for (rel, count) in &stats.requires_relationships {
        println!("  {rel}: {count}");
    }
    for (label, count) in &stats.identity_nodes {
        println!("{label} nodes: {count}");
    }
    if !stats.shared_rules.is_empty() {
        println!("Shared rules:");
        for rule in &stats.shared_rules {
            println!("  {} [{}]: {}", rule.rule_id, rule.expression, rule.policies.join(", "));
        }
    }
    if let Some(build) = &report.last_build {
        println!("Last build content hash: {}", build.content_hash);
    }
    println!("Fingerprint: {}", report.fingerprint);
}
