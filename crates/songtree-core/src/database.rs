//! The database: one tree behind one lock, loaded from and saved to one file.
//!
//! [`SimpleDatabase::open`] tries to load the backing file. If that fails (file
//! missing, corrupt, unreadable) it checks that the file could at least be
//! created or rewritten, and if so starts with an empty tree. Only when the
//! path is unusable does opening fail.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::config::{ConfigError, DatabaseConfig};
use crate::song::Song;
use crate::store::{self, ParseError, StoreError};
use crate::tree::{DirectoryId, Tree};
use crate::visit::{Selection, VisitError};

/// Lock a tree, carrying on if a previous holder panicked.
///
/// Core code never leaves the tree half-mutated across a panic point, so a
/// poisoned lock only means some visitor callback panicked.
pub(crate) fn lock_tree(tree: &Mutex<Tree>) -> MutexGuard<'_, Tree> {
    tree.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Song database kept in memory and persisted to a single text file.
#[derive(Debug)]
pub struct SimpleDatabase {
    path: PathBuf,
    tree: Mutex<Tree>,
    /// Held for a whole save, so saves land on disk in the order they rendered.
    saving: Mutex<()>,
    /// Seconds since the epoch of the last successful load or save; 0 means never.
    mtime: AtomicU64,
}

impl SimpleDatabase {
    /// Name under which this backend is selected in the configuration.
    pub const PLUGIN_NAME: &'static str = "simple";

    /// Validate the configuration. The tree stays empty until [`open`](Self::open).
    pub fn configure(config: &DatabaseConfig) -> Result<Self, DbError> {
        let path = config.database_path()?;
        Ok(Self {
            path,
            tree: Mutex::new(Tree::new()),
            saving: Mutex::new(()),
            mtime: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time of the last successful load or save, taken from the file.
    pub fn mtime(&self) -> Option<SystemTime> {
        match self.mtime.load(Ordering::Acquire) {
            0 => None,
            secs => Some(UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    /// Check that the backing file can be read and written, or created if it is missing.
    pub fn check(&self) -> Result<(), DbError> {
        let path = &self.path;
        let Ok(meta) = fs::metadata(path) else {
            return check_parent(path);
        };
        if !meta.is_file() {
            return Err(DbError::io(format!(
                "db file \"{}\" is not a regular file",
                path.display()
            )));
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map(drop)
            .map_err(|e| {
                DbError::io_source(
                    format!("can't open db file \"{}\" for reading/writing", path.display()),
                    e,
                )
            })
    }

    /// Load the backing file, falling back to an empty tree when the file is
    /// unusable but the path could still be written.
    pub fn open(&mut self) -> Result<(), DbError> {
        *self.tree.get_mut().unwrap_or_else(PoisonError::into_inner) = Tree::new();
        self.mtime.store(0, Ordering::Release);

        if let Err(error) = self.load() {
            warn!(
                path = %self.path.display(),
                error = &error as &dyn std::error::Error,
                "failed to load database"
            );
            self.check()?;
            *self.tree.get_mut().unwrap_or_else(PoisonError::into_inner) = Tree::new();
        }
        Ok(())
    }

    /// Replace the tree with the backing file's contents. On failure the current
    /// tree is left untouched.
    pub fn load(&self) -> Result<(), DbError> {
        let tree = store::load_file(&self.path).map_err(|e| match e {
            StoreError::Io(source) => DbError::io_source(
                format!("failed to open database file \"{}\"", self.path.display()),
                source,
            ),
            StoreError::Parse(source) => DbError::Parse {
                path: self.path.clone(),
                source,
            },
        })?;
        let directories = tree.directory_count();
        *lock_tree(&self.tree) = tree;
        self.record_mtime();
        info!(path = %self.path.display(), directories, "database loaded");
        Ok(())
    }

    /// Drop empty directories, sort everything, and write the file.
    ///
    /// Pruning and sorting stay in effect even if the write fails; the file then
    /// keeps its previous contents.
    pub fn save(&self) -> Result<(), DbError> {
        let _saving = self.saving.lock().unwrap_or_else(PoisonError::into_inner);
        let data = {
            let mut tree = lock_tree(&self.tree);
            debug!("removing empty directories from database");
            tree.prune_empty();
            debug!("sorting database");
            tree.sort();
            store::render(&tree)
        };
        let data = data.map_err(|e| DbError::io_source("failed to serialize database", e))?;

        debug!(path = %self.path.display(), bytes = data.len(), "writing database");
        store::write_atomic(&self.path, &data).map_err(|e| {
            DbError::io_source(
                format!("unable to write to db file \"{}\"", self.path.display()),
                e,
            )
        })?;
        self.record_mtime();
        info!(path = %self.path.display(), "database saved");
        Ok(())
    }

    /// Release the tree. Consumes the database so it cannot be queried afterwards.
    pub fn close(self) {
        debug!(path = %self.path.display(), "closing database");
    }

    /// Exclusive access to the tree, for code that mutates it (scanners, updaters).
    ///
    /// Do not hold the guard while calling other methods of this database.
    pub fn lock(&self) -> MutexGuard<'_, Tree> {
        lock_tree(&self.tree)
    }

    /// Song at `uri` (directory URI plus the song's own URI).
    pub fn get_song(&self, uri: &str) -> Result<Song, DbError> {
        self.find_song(uri)
            .ok_or_else(|| DbError::SongNotFound(uri.to_string()))
    }

    /// Like [`get_song`](Self::get_song) for callers only probing for existence.
    pub fn find_song(&self, uri: &str) -> Option<Song> {
        let tree = self.lock();
        tree.lookup_song(uri).map(|(_, song)| song.clone())
    }

    pub fn lookup_directory(&self, uri: &str) -> Option<DirectoryId> {
        self.lock().lookup_directory(uri)
    }

    /// Run `selection` against the tree. Stops at the first failing visitor.
    pub fn visit(&self, selection: Selection<'_>) -> Result<(), DbError> {
        debug!(uri = selection.uri(), recursive = selection.is_recursive(), "visiting");
        selection.run(&self.tree)
    }

    fn record_mtime(&self) {
        let secs = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        if let Some(secs) = secs {
            self.mtime.store(secs.max(1), Ordering::Release);
        }
    }
}

/// The file does not exist: its directory must exist and accept new files.
fn check_parent(path: &Path) -> Result<(), DbError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let meta = fs::metadata(parent).map_err(|e| {
        DbError::io_source(
            format!("couldn't stat parent directory of db file \"{}\"", path.display()),
            e,
        )
    })?;
    if !meta.is_dir() {
        return Err(DbError::io(format!(
            "couldn't create db file \"{}\" because the parent path is not a directory",
            path.display()
        )));
    }
    tempfile::tempfile_in(parent).map(drop).map_err(|e| {
        DbError::io_source(
            format!("can't create db file in \"{}\"", parent.display()),
            e,
        )
    })
}


#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{message}")]
    Io {
        message: String,
        source: Option<io::Error>,
    },
    #[error("failed to parse database file \"{}\"", .path.display())]
    Parse { path: PathBuf, source: ParseError },
    #[error("no such song: {0}")]
    SongNotFound(String),
    #[error("no such directory: {0}")]
    DirectoryNotFound(String),
    #[error("visitor failed")]
    Visitor(#[from] VisitError),
}

impl DbError {
    fn io(message: String) -> Self {
        Self::Io {
            message,
            source: None,
        }
    }

    fn io_source(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: context.into(),
            source: Some(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SongNotFound(_) | Self::DirectoryNotFound(_))
    }
}
