//! `pga check`：策略图静态检查（错误码 4 到 8）

use std::path::PathBuf;

use anyhow::Result;
use pga_detect::{OutputFormat, Reporter, SensitiveCatalog, run_static_checks};
use pga_graph::GraphQuery;

use crate::config::{Config, SENSITIVE_FILE};

pub fn run(config: &Config, perm_file: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let graph = config.open_store()?;
    let views = GraphQuery::new(&graph).policy_views()?;
    if views.is_empty() {
        tracing::warn!(store = %config.store_dir.display(), "policy graph is empty, run `pga build` first");
    }

    let perm_file = config.assist_file(perm_file, SENSITIVE_FILE);
    let catalog = SensitiveCatalog::load(&perm_file);
    tracing::debug!(
        policies = views.len(),
        sensitive = catalog.entries().len(),
        "running static checks"
    );

    let findings = run_static_checks(&views, &catalog);
    let mut reporter = Reporter::stdout(format);
    reporter.report_all(&findings);
    reporter.finish(views.len());
    Ok(())
}
