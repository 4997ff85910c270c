use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Platform data directory for `vanish.db` and `vanish.key`
/// (`~/.local/share/vanish/` on Linux), created if missing.
///
/// An explicit `VANISH_DATA_DIR` is handled by the server config before
/// this is consulted.
pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "vanish")
        .context("could not determine platform data directory")?;

    let path = dirs.data_dir().to_owned();
    std::fs::create_dir_all(&path).context("create platform data dir")?;
    Ok(path)
}
