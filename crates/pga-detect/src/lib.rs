//! PGA Detect: 策略配置核查
//!
//! - `duplicate`：源文件级重复检查（错误码 1、2、3、9）
//! - `static_checks`：图上的静态检查（错误码 4 到 8）
//! - `authorization`：基于 RBAC 审计日志的越权检查（错误码 10、11）
//! - `role_tier`：高低权限角色错配统计（错误码 12、13）
//! - `lookup`：协作数据（CSV / JSON）加载，缺失时降级为空
//! - `reporter`：按错误码模板输出检测结果

pub mod authorization;
pub mod duplicate;
pub mod finding;
pub mod lookup;
pub mod reporter;
pub mod role_tier;
pub mod static_checks;

pub use authorization::{Observation, check_authorization, join_observations};
pub use duplicate::check_duplicates;
pub use finding::{Finding, FindingKind};
pub use lookup::{GrantIndex, RoleLevels, RoleTier, SensitiveCatalog, SensitiveEntry};
pub use reporter::{OutputFormat, ReportBlock, Reporter};
pub use role_tier::{TierRow, check_role_tiers, collect_tier_rows};
pub use static_checks::run_static_checks;
