//! `pga build`：编译策略文件并写入策略图

use std::path::PathBuf;

use anyhow::Result;
use pga_detect::OutputFormat;
use pga_graph::{BuildSummary, GraphQuery, GraphStore, NodeLabel, build_policy_graph};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::lint_cmd::compile_files;

pub const LAST_BUILD_KEY: &str = "last_build";

/// 最近一次构建的记录（存于 metadata 列族）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub files: Vec<String>,
    pub content_hash: String,
    pub fingerprint: String,
    /// 构建前清除的旧节点数
    pub cleared_nodes: usize,
    pub summary: BuildSummary,
}

pub fn run(config: &Config, files: &[PathBuf], format: OutputFormat) -> Result<()> {
    tracing::info!(files = files.len(), store = %config.store_dir.display(), "building policy graph");

    // ── 1. 加载并编译 ──
    let set = compile_files(files)?;

    // ── 2. 清除旧策略图，身份子图保留 ──
    let mut graph = config.open_store()?;
    let cleared_nodes = graph.clear_labels(&NodeLabel::POLICY_GRAPH)?;
    tracing::debug!(cleared_nodes, "cleared previous policy graph");

    // ── 3. 构建 ──
    let summary = build_policy_graph(&mut graph, &set.policy_dict())?;
    let record = BuildRecord {
        files: files.iter().map(|f| f.display().to_string()).collect(),
        content_hash: set.content_hash.clone(),
        fingerprint: GraphQuery::new(&graph).fingerprint()?,
        cleared_nodes,
        summary,
    };
    graph.put_metadata(LAST_BUILD_KEY, &record)?;

    // ── 4. 输出 ──
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Text => print_text_summary(&record),
    }
    Ok(())
}

fn print_text_summary(record: &BuildRecord) {
    let summary = &record.summary;
    println!("Policy graph built");
    println!("  policies:       {}", summary.policies);
    println!("  rules:          {}", summary.rules);
    println!("  conditions:     {}", summary.conditions);
    println!("  HAS_RULE:       {}", summary.has_rule_edges);
    println!("  REQUIRES_*:     {}", summary.requires_edges);
    println!("  fingerprint:    {}", record.fingerprint);
    if !summary.skipped.is_empty() {
        println!("Skipped {} policies:", summary.skipped.len());
        for item in &summary.skipped {
            println!("  {}: {}", item.policy, item.reason);
        }
    }
    if !summary.shared_rules.is_empty() {
        println!("Found {} rules shared by several policies:", summary.shared_rules.len());
        for rule in &summary.shared_rules {
            println!("  {} [{}] used by {}", rule.rule_id, rule.expression, rule.policies.len());
            for policy in &rule.policies {
                println!("    - {policy}");
            }
        }
    }
}
