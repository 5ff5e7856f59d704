//! PGA Graph: 策略图模型、存储与查询
//!
//! - `model`：节点（PolicyNode / RuleNode / ConditionNode 及身份图节点）与关系类型
//! - `store`：`GraphStore` 查询接口与内存实现
//! - `rocks`：RocksDB 持久化实现
//! - `builder`：PolicyDict → Policy / Rule / Condition 图（规则按规范化文本去重）
//! - `query`：检测器使用的读查询、统计与指纹
//! - `identity`：User → Token → Role 身份子图导入

pub mod builder;
pub mod identity;
pub mod model;
pub mod query;
pub mod rocks;
pub mod store;

pub use builder::{BuildSession, BuildSummary, SharedRule, SkippedItem, build_policy_graph};
pub use identity::{IdentitySummary, RoleGrant, import_identity};
pub use model::{
    ConditionNode, GraphEdge, GraphNode, MergeOutcome, NodeLabel, NodeRef, PolicyNode,
    Relationship, RuleNode,
};
pub use query::{GraphQuery, GraphStatistics, PolicyView, Requirement, RuleView};
pub use rocks::RocksGraph;
pub use store::{GraphStore, MemoryGraph};
