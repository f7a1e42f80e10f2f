//! Input and output paper files

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use paperlink_core::PaperRecord;
use paperlink_store::write_json_atomic;
use serde_json::Value;

/// Problems listed in the error before truncating
const MAX_REPORTED_PROBLEMS: usize = 5;

/// Read a JSON list of paper records.
///
/// Any record that fails to parse or validate makes the whole file invalid;
/// the error names the first few offending records by index.
pub fn read_papers(path: &Path) -> Result<Vec<PaperRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("input file is not valid JSON: {}", path.display()))?;
    let Value::Array(items) = value else {
        bail!("input file must contain a JSON list of paper records: {}", path.display());
    };

    let mut papers = Vec::with_capacity(items.len());
    let mut problems = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<PaperRecord>(item) {
            Ok(paper) => match paper.validate() {
                Ok(()) => papers.push(paper),
                Err(e) => problems.push(format!("record {i}: {e}")),
            },
            Err(e) => problems.push(format!("record {i}: {e}")),
        }
    }

    if !problems.is_empty() {
        let shown = problems
            .iter()
            .take(MAX_REPORTED_PROBLEMS)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        bail!(
            "{} invalid record(s) in {}: {shown}{}",
            problems.len(),
            path.display(),
            if problems.len() > MAX_REPORTED_PROBLEMS { "; ..." } else { "" }
        );
    }
    log::debug!("read {} papers from {}", papers.len(), path.display());
    Ok(papers)
}

/// `<dir>/<stem>.consolidated.json` next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "papers".to_string());
    input.with_file_name(format!("{stem}.consolidated.json"))
}

/// Write the papers with their provenance lists, atomically.
pub fn write_output(path: &Path, papers: &[PaperRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir: {}", parent.display()))?;
    }
    write_json_atomic(path, papers)?;
    log::info!("wrote {} papers to {}", papers.len(), path.display());
    Ok(())
}
