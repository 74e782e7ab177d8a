//! Populating the database from a music directory on disk.
//!
//! Mirrors the directory structure, adds audio files as songs and playlist files
//! as playlists. Tags are not read here; songs only carry their modification time.

use std::path::{Component, Path};
use std::time::UNIX_EPOCH;

use songtree_core::{Playlist, SimpleDatabase, Song, Tree, TreeError};
use tracing::{debug, warn};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "ogg", "opus", "wav", "m4a", "aac", "mod", "xm", "it", "s3m"];
const PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8", "pls"];

/// What an import added or refreshed.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub directories: usize,
    pub songs: usize,
    pub playlists: usize,
    pub skipped: usize,
}

/// Walk `music_root` and merge what is found into `db`. Existing entries with the
/// same URI are replaced. Each change is made under the database lock.
pub fn import(db: &SimpleDatabase, music_root: &Path) -> Result<ImportSummary, ImportError> {
    if !music_root.is_dir() {
        return Err(ImportError::NotADirectory(music_root.display().to_string()));
    }
    let mut summary = ImportSummary::default();
    for entry in WalkDir::new(music_root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.map_err(|e| ImportError::Walk(e.to_string()))?;
        let Some(uri) = relative_uri(music_root, entry.path()) else {
            warn!(path = %entry.path().display(), "skipping path that is not valid UTF-8");
            summary.skipped += 1;
            continue;
        };
        let mtime = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        let kind = if entry.file_type().is_dir() {
            Kind::Directory
        } else {
            let extension = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
                Kind::Song
            } else if PLAYLIST_EXTENSIONS.contains(&extension.as_str()) {
                Kind::Playlist
            } else {
                debug!(%uri, "not a song or playlist");
                summary.skipped += 1;
                continue;
            }
        };

        let mut tree = db.lock();
        let added = match kind {
            Kind::Directory => add_directory(&mut tree, &uri, mtime),
            Kind::Song => add_song(&mut tree, &uri, mtime),
            Kind::Playlist => add_playlist(&mut tree, &uri, mtime),
        };
        match added {
            Ok(()) => match kind {
                Kind::Directory => summary.directories += 1,
                Kind::Song => summary.songs += 1,
                Kind::Playlist => summary.playlists += 1,
            },
            Err(error @ (TreeError::InvalidName(_) | TreeError::TooDeep(_))) => {
                warn!(%uri, %error, "skipping entry the database cannot hold");
                summary.skipped += 1;
            }
            Err(error) => return Err(error.into()),
        }
    }
    Ok(summary)
}

#[derive(Clone, Copy)]
enum Kind {
    Directory,
    Song,
    Playlist,
}

fn add_directory(tree: &mut Tree, uri: &str, mtime: u64) -> Result<(), TreeError> {
    let id = tree.ensure_directory(uri)?;
    tree.set_mtime(id, mtime)
}

fn add_song(tree: &mut Tree, uri: &str, mtime: u64) -> Result<(), TreeError> {
    let (dir_uri, name) = uri.rsplit_once('/').unwrap_or(("", uri));
    let dir = tree.ensure_directory(dir_uri)?;
    tree.remove_song(dir, name);
    tree.add_song(dir, Song::new(name).with_mtime(mtime))
}

fn add_playlist(tree: &mut Tree, uri: &str, mtime: u64) -> Result<(), TreeError> {
    let (dir_uri, name) = uri.rsplit_once('/').unwrap_or(("", uri));
    let dir = tree.ensure_directory(dir_uri)?;
    tree.remove_playlist(dir, name);
    tree.add_playlist(dir, Playlist::new(name).with_mtime(mtime))
}

/// `/`-joined path of `path` below `root`, or `None` if any part is not UTF-8.
fn relative_uri(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str()?),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}


#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("cannot add to database: {0}")]
    Tree(#[from] TreeError),
}
