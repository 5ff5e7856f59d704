//! PGA Policy DSL: oslo.policy 规则表达式的解析与编译
//!
//! 处理流程：
//! - 策略文件读取（YAML / `key: "expr"` 行格式 / JSON 行格式）
//! - 表达式规范化（空白折叠、`and`/`or` 小写）
//! - `rule:<name>` 引用展开（环检测、深度保护）
//! - 递归下降解析为布尔树 (`BoolExpr`)
//! - 最小匹配单元 (DNF) 提取
//! - 编译为 `CompiledPolicySet`，供图构建与重复检测使用

pub mod ast;
pub mod compiler;
pub mod normalize;
pub mod parser;
pub mod resolve;
pub mod source;
pub mod units;

pub use ast::{BoolExpr, ConditionKind, FlatAtom};
pub use compiler::{
    CompileWarning, CompiledExpr, CompiledPolicy, CompiledPolicySet, PolicyDict, PolicyEntry,
    compile_policy_set,
};
pub use normalize::normalize;
pub use parser::{ParseError, parse_expression};
pub use resolve::{ResolveWarning, Resolver};
pub use source::{
    LoadedPolicies, PolicyRecord, SkippedLine, SourceLine, load_policy_file, load_policy_files,
    parse_policy_source,
};
pub use units::{MinimalUnit, UnitExtractor, extract};
