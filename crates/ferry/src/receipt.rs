//! Receipt persistence.
//!
//! A receipt is the durable summary of the latest run: outcome, tag and one
//! entry per target. It is rewritten atomically at the end of every run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ferry_types::{RECEIPT_VERSION, Receipt};

/// Default receipt file name
pub const RECEIPT_FILE: &str = "receipt.json";

/// Get the receipt file path for a state directory
pub fn receipt_path(state_dir: &Path) -> PathBuf {
    state_dir.join(RECEIPT_FILE)
}

pub fn write_receipt(state_dir: &Path, receipt: &Receipt) -> Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;
    atomic_write_json(&receipt_path(state_dir), receipt)
}

/// Load the last receipt, or `None` if no run has finished yet.
pub fn load_receipt(state_dir: &Path) -> Result<Option<Receipt>> {
    let path = receipt_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read receipt file {}", path.display()))?;
    let receipt: Receipt = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse receipt JSON {}", path.display()))?;
    if receipt.receipt_version != RECEIPT_VERSION {
        bail!(
            "unsupported receipt version {} in {} (expected {RECEIPT_VERSION})",
            receipt.receipt_version,
            path.display()
        );
    }
    Ok(Some(receipt))
}

/// Best-effort fsync of the parent directory after a rename. Not every
/// platform can open a directory for sync, so errors are ignored.
fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

/// Write `value` next to `path` under a unique temporary name, then rename it
/// into place, so concurrent writers never share a temporary file.
fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let data = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".receipt-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("failed to create tmp file in {}", dir.display()))?;
    let tmp_path = tmp.path().to_path_buf();
    tmp.write_all(&data)
        .with_context(|| format!("failed to write tmp file {}", tmp_path.display()))?;
    tmp.as_file().sync_all().ok();

    tmp.persist(path).map_err(|e| e.error).with_context(|| {
        format!(
            "failed to rename tmp file {} to {}",
            tmp_path.display(),
            path.display()
        )
    })?;

    fsync_parent_dir(path);

    Ok(())
}
