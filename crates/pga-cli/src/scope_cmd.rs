//! `pga scope-check`：基于 RBAC 审计日志的授权范围检查（错误码 10、11）

use std::path::PathBuf;

use anyhow::Result;
use pga_detect::authorization::{summarize, summary_lines, write_observations};
use pga_detect::lookup::{load_audit_records, load_role_grants};
use pga_detect::{GrantIndex, OutputFormat, Reporter, check_authorization, join_observations};
use pga_graph::GraphQuery;

use crate::config::{AUDIT_FILE, Config, ROLEGRANT_FILE};

pub fn run(
    config: &Config,
    audit_files: Vec<PathBuf>,
    rolegrant_file: Option<PathBuf>,
    observed_out: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    // ── 1. 读取策略图（存储不可用时不产生任何输出） ──
    let graph = config.open_store()?;
    let views = GraphQuery::new(&graph).policy_views()?;

    // ── 2. 审计记录与角色授权关联 ──
    let audit_files = if audit_files.is_empty() {
        vec![config.assist_dir.join(AUDIT_FILE)]
    } else {
        audit_files
    };
    let records = load_audit_records(&audit_files);
    let grants = load_role_grants(&config.assist_file(rolegrant_file, ROLEGRANT_FILE));
    let observations = join_observations(&records, &GrantIndex::new(&grants));
    tracing::info!(
        records = records.len(),
        grants = grants.len(),
        observations = observations.len(),
        "joined audit log with role grants"
    );

    if let Some(path) = observed_out {
        write_observations(&path, &observations)?;
    }
    if format == OutputFormat::Text && !observations.is_empty() {
        println!("api | user | role | project | count");
        for line in summary_lines(&summarize(&observations)) {
            println!("{line}");
        }
        println!();
    }

    // ── 3. 与策略图对比 ──
    let findings = check_authorization(&views, &observations);

    let mut reporter = Reporter::stdout(format);
    reporter.report_all(&findings);
    reporter.finish(views.len());
    Ok(())
}
