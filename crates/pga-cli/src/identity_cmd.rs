//! `pga import-identity`：导入角色授权，构建身份子图

use std::path::PathBuf;

use anyhow::{Result, bail};
use pga_detect::OutputFormat;
use pga_detect::lookup::load_role_grants;
use pga_graph::import_identity;

use crate::config::{Config, ROLEGRANT_FILE};

pub fn run(config: &Config, rolegrant_file: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let path = config.assist_file(rolegrant_file, ROLEGRANT_FILE);
    let grants = load_role_grants(&path);
    if grants.is_empty() {
        bail!("no role grants found in '{}'", path.display());
    }

    let mut graph = config.open_store()?;
    let summary = import_identity(&mut graph, &grants)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            println!("Identity graph imported from {}", path.display());
            println!("  grants:        {}", summary.grants);
            println!("  users:         {}", summary.users);
            println!("  tokens:        {}", summary.tokens);
            println!("  roles:         {}", summary.roles);
            println!("  system scopes: {}", summary.system_scopes);
        }
    }
    Ok(())
}
