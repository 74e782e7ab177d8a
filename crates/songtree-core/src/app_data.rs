//! Where songtree keeps its own files (the default config).

use std::path::PathBuf;

/// Returns the directory where songtree stores its config.
/// On Linux: `~/.local/share/songtree/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Songtree", "songtree")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
