//! 运行配置：内置默认值 < 环境变量 < 命令行参数

use std::path::PathBuf;

use anyhow::Result;
use pga_graph::RocksGraph;

pub const STORE_DIR_ENV: &str = "PGA_STORE_DIR";
pub const ASSIST_DIR_ENV: &str = "PGA_ASSIST_DIR";

const DEFAULT_STORE_DIR: &str = "./policy-graph-data";
const DEFAULT_ASSIST_DIR: &str = "./data/assistfile";

pub const SENSITIVE_FILE: &str = "sensitive_permissions.csv";
pub const ROLEGRANT_FILE: &str = "rolegrant.csv";
pub const PROJECTINFO_FILE: &str = "projectinfo.csv";
pub const ROLE_LEVEL_FILE: &str = "role_level.json";
pub const AUDIT_FILE: &str = "rbac_audit_keystone.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// RocksDB 图存储目录
    pub store_dir: PathBuf,
    /// 协作数据文件所在目录
    pub assist_dir: PathBuf,
}

impl Config {
    pub fn from_env(store_flag: Option<PathBuf>) -> Self {
        Self::resolve(store_flag, |name| std::env::var(name).ok())
    }

    fn resolve(store_flag: Option<PathBuf>, var: impl Fn(&str) -> Option<String>) -> Self {
        let from_var = |name: &str, default: &str| {
            var(name)
                .filter(|v| !v.trim().is_empty())
                .map_or_else(|| PathBuf::from(default), PathBuf::from)
        };
        Self {
            store_dir: store_flag.unwrap_or_else(|| from_var(STORE_DIR_ENV, DEFAULT_STORE_DIR)),
            assist_dir: from_var(ASSIST_DIR_ENV, DEFAULT_ASSIST_DIR),
        }
    }

    /// `flag` if given, otherwise `name` inside the assist directory.
    pub fn assist_file(&self, flag: Option<PathBuf>, name: &str) -> PathBuf {
        flag.unwrap_or_else(|| self.assist_dir.join(name))
    }

    /// Open the graph store. Failure aborts the command.
    pub fn open_store(&self) -> Result<RocksGraph> {
        RocksGraph::open(&self.store_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::resolve(None, |_| None);
        assert_eq!(config.store_dir, PathBuf::from("./policy-graph-data"));
        assert_eq!(
            config.assist_file(None, ROLEGRANT_FILE),
            PathBuf::from("./data/assistfile/rolegrant.csv")
        );
    }

    #[test]
    fn test_env_then_flag() {
        let env = |name: &str| match name {
            STORE_DIR_ENV => Some("/var/pga".to_string()),
            ASSIST_DIR_ENV => Some("/etc/pga".to_string()),
            _ => None,
        };
        let config = Config::resolve(None, env);
        assert_eq!(config.store_dir, PathBuf::from("/var/pga"));
        assert_eq!(config.assist_dir, PathBuf::from("/etc/pga"));

        let config = Config::resolve(Some(PathBuf::from("/tmp/graph")), env);
        assert_eq!(config.store_dir, PathBuf::from("/tmp/graph"));
        assert_eq!(
            config.assist_file(Some(PathBuf::from("perm.csv")), SENSITIVE_FILE),
            PathBuf::from("perm.csv")
        );
    }

    #[test]
    fn test_blank_env_ignored() {
        let config = Config::resolve(None, |_| Some("  ".to_string()));
        assert_eq!(config.store_dir, PathBuf::from("./policy-graph-data"));
    }
}
