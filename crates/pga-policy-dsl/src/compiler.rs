//! 策略集编译器：PolicyRecord 列表 → CompiledPolicySet
//!
//! 编译流程：
//! 1. 区分策略键（含冒号）与规则别名（不含冒号）
//! 2. 展开 `rule:` 引用（别名与策略共同组成定义表，后出现的定义覆盖先出现的）
//! 3. 逐条解析表达式，解析失败的源行跳过并记录警告
//! 4. 提取最小匹配单元
//! 5. 计算规范化表达式的内容哈希

use std::collections::{BTreeMap, HashMap};

use pga_common::hash::blake3_hex;
use serde::{Deserialize, Serialize};

use crate::ast::BoolExpr;
use crate::normalize::normalize;
use crate::parser::parse_expression;
use crate::resolve::Resolver;
use crate::source::{PolicyRecord, SourceLine};
use crate::units::{MinimalUnit, UnitExtractor};

// ============================================================
// Data structures
// ============================================================

/// 单条源行编译后的表达式
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledExpr {
    pub source: SourceLine,
    /// 文件中的原始文本
    pub raw: String,
    /// 展开 `rule:` 引用后的文本
    pub resolved: String,
    pub normalized: String,
    pub tree: BoolExpr,
    pub units: Vec<MinimalUnit>,
}

/// 一个策略键及其所有源行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledPolicy {
    pub key: String,
    pub expressions: Vec<CompiledExpr>,
}

impl CompiledPolicy {
    pub fn sources(&self) -> Vec<SourceLine> {
        self.expressions.iter().map(|e| e.source.clone()).collect()
    }

    /// Distinct normalized expressions in first-seen order.
    pub fn distinct_normalized(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for expr in &self.expressions {
            if !out.contains(&expr.normalized.as_str()) {
                out.push(&expr.normalized);
            }
        }
        out
    }

    /// Policy name after the first colon (`create_user` for `identity:create_user`).
    pub fn short_name(&self) -> &str {
        self.key
            .split_once(':')
            .map_or(self.key.as_str(), |(_, name)| name)
    }
}

/// 编译警告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileWarning {
    pub message: String,
    pub policy: Option<String>,
    pub source: Option<SourceLine>,
}

/// 编译结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompiledPolicySet {
    /// 按首次出现顺序排列的策略
    pub policies: Vec<CompiledPolicy>,
    /// 规则别名（不含冒号的键）→ 最后一次定义的原始表达式
    pub aliases: BTreeMap<String, String>,
    /// 规范化表达式的 blake3 哈希
    pub content_hash: String,
    pub warnings: Vec<CompileWarning>,
}

impl CompiledPolicySet {
    pub fn policy(&self, key: &str) -> Option<&CompiledPolicy> {
        self.policies.iter().find(|p| p.key == key)
    }

    pub fn expression_count(&self) -> usize {
        self.policies.iter().map(|p| p.expressions.len()).sum()
    }

    /// Builder input: every policy with its resolved expressions.
    pub fn policy_dict(&self) -> PolicyDict {
        let mut dict = PolicyDict::default();
        for policy in &self.policies {
            for expr in &policy.expressions {
                dict.insert(&policy.key, &expr.resolved, Some(expr.source.clone()));
            }
        }
        dict
    }
}

/// 一个策略键的规则表达式列表（图构建输入）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub key: String,
    pub expressions: Vec<String>,
    pub sources: Vec<SourceLine>,
}

/// 有序的 policy key → expressions 映射
#[derive(Debug, Clone, Default)]
pub struct PolicyDict {
    entries: Vec<PolicyEntry>,
    index: HashMap<String, usize>,
}

impl PolicyDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `expression` to `key`, creating the entry on first use.
    pub fn insert(&mut self, key: &str, expression: &str, source: Option<SourceLine>) {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => {
                self.entries.push(PolicyEntry {
                    key: key.to_string(),
                    ..PolicyEntry::default()
                });
                self.index.insert(key.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[idx];
        entry.expressions.push(expression.to_string());
        if let Some(source) = source
            && !entry.sources.contains(&source)
        {
            entry.sources.push(source);
        }
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&PolicyEntry> {
        self.index.get(key).map(|&idx| &self.entries[idx])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, E: AsRef<str>> FromIterator<(K, Vec<E>)> for PolicyDict {
    fn from_iter<T: IntoIterator<Item = (K, Vec<E>)>>(iter: T) -> Self {
        let mut dict = PolicyDict::new();
        for (key, expressions) in iter {
            for expr in expressions {
                dict.insert(key.as_ref(), expr.as_ref(), None);
            }
        }
        dict
    }
}

// ============================================================
// Compilation
// ============================================================

fn is_alias(key: &str) -> bool {
    !key.contains(':')
}

pub fn compile_policy_set(records: &[PolicyRecord]) -> CompiledPolicySet {
    let mut definitions: BTreeMap<String, String> = BTreeMap::new();
    let mut aliases = BTreeMap::new();
    for record in records {
        definitions.insert(record.key.clone(), record.expression.clone());
        if is_alias(&record.key) {
            aliases.insert(record.key.clone(), record.expression.clone());
        }
    }

    let mut resolver = Resolver::new(&definitions);
    let mut warnings = Vec::new();
    let mut policies: Vec<CompiledPolicy> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records.iter().filter(|r| !is_alias(&r.key)) {
        let warned_before = resolver.warnings().len();
        let resolved = resolver.resolve_expr(&record.key, &record.expression);
        for w in &resolver.warnings()[warned_before..] {
            warnings.push(CompileWarning {
                message: w.to_string(),
                policy: Some(record.key.clone()),
                source: Some(record.source.clone()),
            });
        }

        let normalized = normalize(&resolved);
        let tree = match parse_expression(&normalized) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(
                    policy = %record.key,
                    source = %record.source,
                    error = %e,
                    "skipping unparseable rule expression"
                );
                warnings.push(CompileWarning {
                    message: format!("parse error: {e}"),
                    policy: Some(record.key.clone()),
                    source: Some(record.source.clone()),
                });
                continue;
            }
        };

        let mut extractor = UnitExtractor::new(&record.key);
        let units = extractor.extract(&tree);
        for dropped in extractor.dropped() {
            warnings.push(CompileWarning {
                message: format!("unsupported condition '{dropped}' dropped"),
                policy: Some(record.key.clone()),
                source: Some(record.source.clone()),
            });
        }

        let compiled = CompiledExpr {
            source: record.source.clone(),
            raw: record.expression.clone(),
            resolved,
            normalized,
            tree,
            units,
        };
        match positions.get(&record.key) {
            Some(&idx) => policies[idx].expressions.push(compiled),
            None => {
                positions.insert(record.key.clone(), policies.len());
                policies.push(CompiledPolicy {
                    key: record.key.clone(),
                    expressions: vec![compiled],
                });
            }
        }
    }

    let content_hash = content_hash(&policies);
    tracing::debug!(
        policies = policies.len(),
        aliases = aliases.len(),
        warnings = warnings.len(),
        %content_hash,
        "compiled policy set"
    );

    CompiledPolicySet {
        policies,
        aliases,
        content_hash,
        warnings,
    }
}

fn content_hash(policies: &[CompiledPolicy]) -> String {
    let mut buf = String::new();
    for policy in policies {
        for expr in &policy.expressions {
            buf.push_str(&policy.key);
            buf.push('\t');
            buf.push_str(&expr.normalized);
            buf.push('\n');
        }
    }
    blake3_hex(buf.as_bytes())
}
