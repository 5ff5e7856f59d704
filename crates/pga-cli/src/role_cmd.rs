//! `pga role-check`：高低权限角色错配统计检查（错误码 12、13）

use std::path::PathBuf;

use anyhow::Result;
use pga_detect::lookup::load_project_map;
use pga_detect::role_tier::write_tier_csv;
use pga_detect::{OutputFormat, Reporter, RoleLevels, check_role_tiers, collect_tier_rows};
use pga_graph::GraphQuery;

use crate::config::{Config, PROJECTINFO_FILE, ROLE_LEVEL_FILE};

pub fn run(
    config: &Config,
    role_config: Option<PathBuf>,
    project_map: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let levels = RoleLevels::load(&config.assist_file(role_config, ROLE_LEVEL_FILE));
    let projects = load_project_map(&config.assist_file(project_map, PROJECTINFO_FILE));

    let graph = config.open_store()?;
    let views = GraphQuery::new(&graph).policy_views()?;
    let rows = collect_tier_rows(&views, &levels, &projects);
    tracing::debug!(rows = rows.len(), projects = projects.len(), "collected role tier rows");

    if let Some(dir) = output_dir {
        let path = write_tier_csv(&dir, &rows)?;
        eprintln!("Role statistics written to {}", path.display());
    }

    let findings = check_role_tiers(&rows);
    let mut reporter = Reporter::stdout(format);
    reporter.report_all(&findings);
    reporter.finish(views.len());
    Ok(())
}
