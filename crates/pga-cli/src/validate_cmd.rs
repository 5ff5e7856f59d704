//! `pga validate`：策略文件加载与表达式解析检查

use std::path::PathBuf;

use anyhow::{Result, bail};
use pga_detect::OutputFormat;
use pga_policy_dsl::{CompileWarning, SkippedLine, compile_policy_set, load_policy_file};
use serde::Serialize;

/// 验证报告
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub entries: usize,
    pub policies: usize,
    pub aliases: usize,
    pub content_hash: String,
    pub skipped: Vec<SkippedLine>,
    pub warnings: Vec<CompileWarning>,
    /// 解析失败的表达式数
    pub parse_errors: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.parse_errors == 0
    }
}

pub fn run(files: &[PathBuf], format: OutputFormat) -> Result<()> {
    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for file in files {
        // an unreadable file is an error here, unlike in build/lint
        let loaded = load_policy_file(file)?;
        records.extend(loaded.records);
        skipped.extend(loaded.skipped);
    }

    let set = compile_policy_set(&records);
    let parse_errors = set
        .warnings
        .iter()
        .filter(|w| w.message.starts_with("parse error"))
        .count();
    let report = ValidationReport {
        entries: records.len(),
        policies: set.policies.len(),
        aliases: set.aliases.len(),
        content_hash: set.content_hash.clone(),
        skipped,
        warnings: set.warnings,
        parse_errors,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text_report(&report),
    }

    if !report.is_valid() {
        bail!("{} rule expression(s) failed to parse", report.parse_errors);
    }
    Ok(())
}

fn print_text_report(report: &ValidationReport) {
    println!(
        "Loaded {} entries: {} policies, {} rule aliases",
        report.entries, report.policies, report.aliases
    );
    for line in &report.skipped {
        println!("  skipped {}: {} ({})", line.source, line.text.trim(), line.reason);
    }
    for warning in &report.warnings {
        match &warning.source {
            Some(source) => println!("  warning {source}: {}", warning.message),
            None => println!("  warning: {}", warning.message),
        }
    }
    println!("Content hash: {}", report.content_hash);
    if report.is_valid() {
        println!("Policy is valid");
    }
}
