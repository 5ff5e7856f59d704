//! `pga lint`：源文件级重复检查（错误码 1、2、3、9）

use std::path::PathBuf;

use anyhow::{Result, bail};
use pga_detect::{OutputFormat, Reporter, check_duplicates};
use pga_policy_dsl::{CompiledPolicySet, compile_policy_set, load_policy_files};

/// Load and compile policy files; skipped lines and compile warnings are
/// logged, an input without any entry is an error.
pub fn compile_files(files: &[PathBuf]) -> Result<CompiledPolicySet> {
    let loaded = load_policy_files(files);
    if loaded.is_empty() {
        bail!("no policy entries found in {} file(s)", files.len());
    }
    for skipped in &loaded.skipped {
        tracing::warn!(source = %skipped.source, reason = %skipped.reason, "skipped policy line");
    }
    let set = compile_policy_set(&loaded.records);
    for warning in &set.warnings {
        match &warning.source {
            Some(source) => tracing::warn!(%source, "{}", warning.message),
            None => tracing::warn!("{}", warning.message),
        }
    }
    tracing::info!(
        entries = loaded.records.len(),
        policies = set.policies.len(),
        aliases = set.aliases.len(),
        content_hash = %set.content_hash,
        "compiled policy set"
    );
    Ok(set)
}

pub fn run(files: &[PathBuf], format: OutputFormat) -> Result<()> {
    let set = compile_files(files)?;
    let findings = check_duplicates(&set);

    let mut reporter = Reporter::stdout(format);
    reporter.report_all(&findings);
    reporter.finish(set.expression_count());
    Ok(())
}
