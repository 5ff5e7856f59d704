//! PGA CLI：策略图构建与配置核查

mod build_cmd;
mod check_cmd;
mod config;
mod explain_cmd;
mod identity_cmd;
mod lint_cmd;
mod role_cmd;
mod roles_cmd;
mod scope_cmd;
mod stats_cmd;
mod validate_cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser, Subcommand};
use pga_common::PgaError;
use pga_detect::OutputFormat;

use crate::config::Config;
use crate::roles_cmd::{LevelArg, RoleAction};

#[derive(Parser)]
#[command(name = "pga", about = "Policy Graph Audit CLI", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// 图存储目录（默认取 PGA_STORE_DIR，再退回 ./policy-graph-data）
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// 输出格式：text / json
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 验证策略文件（加载、引用展开、表达式解析）
    Validate {
        /// 策略文件路径，可重复
        #[arg(short, long, required = true)]
        file: Vec<PathBuf>,
    },
    /// 解释单条规则表达式：规范化文本、布尔树、最小匹配单元
    Explain {
        /// 规则表达式
        #[arg(short, long)]
        expr: String,
        /// 提供 `rule:` 别名定义的策略文件
        #[arg(long = "policy-file")]
        policy_file: Vec<PathBuf>,
    },
    /// 编译策略文件并构建策略图
    Build {
        /// 策略文件路径，可重复
        #[arg(short, long, required = true)]
        file: Vec<PathBuf>,
    },
    /// 源文件级重复检查（错误码 1、2、3、9）
    Lint {
        /// 策略文件路径，可重复
        #[arg(short, long, required = true)]
        file: Vec<PathBuf>,
    },
    /// 策略图静态检查（错误码 4 到 8）
    Check {
        /// 敏感权限清单 CSV
        #[arg(long)]
        perm_file: Option<PathBuf>,
    },
    /// 基于 RBAC 审计日志的授权范围检查（错误码 10、11）
    ScopeCheck {
        /// 审计 CSV 文件路径，可重复
        #[arg(long)]
        audit_file: Vec<PathBuf>,
        /// rolegrant.csv 路径
        #[arg(long)]
        rolegrant_file: Option<PathBuf>,
        /// 审计记录与角色关联结果的 CSV 输出路径
        #[arg(long)]
        observed_out: Option<PathBuf>,
    },
    /// 高低权限角色错配统计检查（错误码 12、13）
    RoleCheck {
        /// 角色分级配置 role_level.json
        #[arg(long)]
        role_config: Option<PathBuf>,
        /// projectinfo.csv 路径
        #[arg(long)]
        project_map: Option<PathBuf>,
        /// RoleStatistic CSV 输出目录
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// 管理高低权限角色集合
    #[command(group(
        ArgGroup::new("action")
            .required(true)
            .args(["list", "add", "remove", "set_roles", "clear"])
    ))]
    Roles {
        /// 角色分级配置 role_level.json
        #[arg(long)]
        role_config: Option<PathBuf>,
        /// 角色级别
        #[arg(long, value_enum)]
        level: LevelArg,
        /// 查看角色配置
        #[arg(long)]
        list: bool,
        /// 新增角色，逗号分隔
        #[arg(long)]
        add: Option<String>,
        /// 删除角色，逗号分隔
        #[arg(long)]
        remove: Option<String>,
        /// 覆盖角色集合，逗号分隔
        #[arg(long)]
        set_roles: Option<String>,
        /// 清空该级别
        #[arg(long)]
        clear: bool,
    },
    /// 导入角色授权，构建 User → Token → Role 身份子图
    ImportIdentity {
        /// rolegrant.csv 路径
        #[arg(long)]
        rolegrant_file: Option<PathBuf>,
    },
    /// 策略图统计、共享规则与指纹
    Stats,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let env_filter = if cli.verbose { "pga=debug" } else { "pga=info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env(cli.store);
    match dispatch(&config, cli.command, cli.format) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // 存储类错误不可恢复，使用独立退出码
            let code = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<PgaError>())
                .map_or(1, PgaError::exit_code);
            eprintln!("Error: {e:?}");
            ExitCode::from(code)
        }
    }
}

fn dispatch(config: &Config, command: Commands, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::Validate { file } => validate_cmd::run(&file, format),
        Commands::Explain { expr, policy_file } => explain_cmd::run(&expr, &policy_file, format),
        Commands::Build { file } => build_cmd::run(config, &file, format),
        Commands::Lint { file } => lint_cmd::run(&file, format),
        Commands::Check { perm_file } => check_cmd::run(config, perm_file, format),
        Commands::ScopeCheck {
            audit_file,
            rolegrant_file,
            observed_out,
        } => scope_cmd::run(config, audit_file, rolegrant_file, observed_out, format),
        Commands::RoleCheck {
            role_config,
            project_map,
            output_dir,
        } => role_cmd::run(config, role_config, project_map, output_dir, format),
        Commands::Roles {
            role_config,
            level,
            list,
            add,
            remove,
            set_roles,
            clear,
        } => {
            let action = RoleAction::from_flags(list, add, remove, set_roles, clear)?;
            roles_cmd::run(config, role_config, level, action)
        }
        Commands::ImportIdentity { rolegrant_file } => {
            identity_cmd::run(config, rolegrant_file, format)
        }
        Commands::Stats => stats_cmd::run(config, format),
    }
}
