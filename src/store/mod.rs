pub mod keywords;
pub mod offsets;

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;

pub use keywords::{AddOutcome, KeywordStore, RemoveOutcome};
pub use offsets::{OffsetStore, Offsets};

/// Replace `path` with `contents` in one step: write a sibling `.tmp` file,
/// then rename it over the target. Readers see either the old or the new file.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
