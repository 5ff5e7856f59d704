//! 测试环境管理：临时目录中的策略文件、协作数据与图存储
//!
//! 每个场景拥有独立的临时目录，场景之间互不影响。

use std::path::{Path, PathBuf};

use pga_detect::{Finding, OutputFormat, Reporter};
use pga_graph::{BuildSummary, GraphQuery, MemoryGraph, PolicyView, RocksGraph, build_policy_graph};
use pga_policy_dsl::{CompiledPolicySet, compile_policy_set, load_policy_files};

/// 端到端测试环境
pub struct TestEnv {
    dir: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// 写入任意文本文件，返回其路径
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(&path, content).expect("failed to write fixture file");
        path
    }

    /// 加载并编译一组策略文件
    pub fn compile(&self, files: &[PathBuf]) -> CompiledPolicySet {
        let loaded = load_policy_files(files);
        compile_policy_set(&loaded.records)
    }

    /// 写入单个策略文件并编译
    pub fn compile_text(&self, name: &str, policy: &str) -> CompiledPolicySet {
        let file = self.write_file(name, policy);
        self.compile(&[file])
    }

    /// 在内存图中构建策略图
    pub fn build_memory(&self, set: &CompiledPolicySet) -> (MemoryGraph, BuildSummary) {
        let mut graph = MemoryGraph::new();
        let summary =
            build_policy_graph(&mut graph, &set.policy_dict()).expect("policy graph build failed");
        (graph, summary)
    }

    /// 打开（或创建）临时目录下的 RocksDB 图存储
    pub fn open_rocks(&self, name: &str) -> RocksGraph {
        RocksGraph::open(self.dir.path().join(name)).expect("failed to open rocks store")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn policy_views(graph: &MemoryGraph) -> Vec<PolicyView> {
    GraphQuery::new(graph)
        .policy_views()
        .expect("policy view query failed")
}

/// 按出现顺序返回错误码
pub fn codes(findings: &[Finding]) -> Vec<&'static str> {
    findings.iter().map(|f| f.code()).collect()
}

/// 以文本格式渲染检测结果
pub fn render_text(findings: &[Finding], rules_read: usize) -> String {
    let mut reporter = Reporter::new(Vec::new(), OutputFormat::Text);
    reporter.report_all(findings);
    let out = reporter.finish(rules_read);
    String::from_utf8(out).expect("report is not utf-8")
}

/// 初始化 tracing（仅首次调用生效）
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pga=debug,info")
        .with_test_writer()
        .try_init();
}
