//! Queries: a [`Selection`] names a starting path and the callbacks to run on
//! whatever lies there.
//!
//! Callbacks receive small views ([`DirectoryRef`], [`SongRef`], [`PlaylistRef`])
//! that do not borrow the tree, so the engine can hand the top-level entity to a
//! callback after releasing the lock. Everything below the starting directory is
//! walked under one continuous lock hold.
//!
//! Callbacks run while the database lock is held. They must not call back into
//! the same database (the lock is not reentrant and would deadlock) and should
//! return promptly.

use std::error::Error;
use std::sync::Mutex;

use crate::database::{lock_tree, DbError};
use crate::song::{Playlist, Song};
use crate::tree::{join_uri, DirectoryId, Tree};

type SongFilter<'a> = Box<dyn Fn(&Song) -> bool + 'a>;
type DirectoryVisitor<'a> = Box<dyn FnMut(&DirectoryRef<'_>) -> Result<(), VisitError> + 'a>;
type SongVisitor<'a> = Box<dyn FnMut(&SongRef<'_>) -> Result<(), VisitError> + 'a>;
type PlaylistVisitor<'a> = Box<dyn FnMut(&PlaylistRef<'_>) -> Result<(), VisitError> + 'a>;

/// A directory as seen by a visitor.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryRef<'r> {
    id: DirectoryId,
    uri: &'r str,
    mtime: u64,
}

impl<'r> DirectoryRef<'r> {
    pub fn id(&self) -> DirectoryId {
        self.id
    }

    /// Full URI; empty for the root.
    pub fn uri(&self) -> &'r str {
        self.uri
    }

    pub fn name(&self) -> &'r str {
        self.uri.rsplit('/').next().unwrap_or(self.uri)
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }
}

/// A song plus the URI of the directory holding it.
#[derive(Debug, Clone, Copy)]
pub struct SongRef<'r> {
    directory: &'r str,
    song: &'r Song,
}

impl<'r> SongRef<'r> {
    pub fn song(&self) -> &'r Song {
        self.song
    }

    pub fn directory_uri(&self) -> &'r str {
        self.directory
    }

    /// Full URI, usable with [`crate::SimpleDatabase::get_song`].
    pub fn uri(&self) -> String {
        join_uri(self.directory, &self.song.uri)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlaylistRef<'r> {
    directory: &'r str,
    playlist: &'r Playlist,
}

impl<'r> PlaylistRef<'r> {
    pub fn playlist(&self) -> &'r Playlist {
        self.playlist
    }

    pub fn directory_uri(&self) -> &'r str {
        self.directory
    }

    pub fn uri(&self) -> String {
        join_uri(self.directory, &self.playlist.name)
    }
}

/// What to visit and how.
///
/// ```
/// # use songtree_core::Selection;
/// let mut found = Vec::new();
/// let selection = Selection::new("Artist")
///     .recursive(true)
///     .matching(|song| song.tag("Genre") == Some("Jazz"))
///     .on_song(|s| {
///         found.push(s.uri());
///         Ok(())
///     });
/// # drop(selection);
/// ```
pub struct Selection<'a> {
    uri: String,
    recursive: bool,
    filter: Option<SongFilter<'a>>,
    directory: Option<DirectoryVisitor<'a>>,
    song: Option<SongVisitor<'a>>,
    playlist: Option<PlaylistVisitor<'a>>,
}

impl<'a> Selection<'a> {
    /// Start at `uri` (`""` is the root), non-recursive, no filter, no visitors.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            recursive: false,
            filter: None,
            directory: None,
            song: None,
            playlist: None,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Only songs accepted by `filter` reach the song visitor.
    pub fn matching(mut self, filter: impl Fn(&Song) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn on_directory(
        mut self,
        visit: impl FnMut(&DirectoryRef<'_>) -> Result<(), VisitError> + 'a,
    ) -> Self {
        self.directory = Some(Box::new(visit));
        self
    }

    pub fn on_song(mut self, visit: impl FnMut(&SongRef<'_>) -> Result<(), VisitError> + 'a) -> Self {
        self.song = Some(Box::new(visit));
        self
    }

    pub fn on_playlist(
        mut self,
        visit: impl FnMut(&PlaylistRef<'_>) -> Result<(), VisitError> + 'a,
    ) -> Self {
        self.playlist = Some(Box::new(visit));
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Whether `song` passes the filter. No filter accepts everything.
    pub fn accepts(&self, song: &Song) -> bool {
        self.filter.as_ref().map_or(true, |f| f(song))
    }

    /// Resolve the starting path and run the visitors over what is found there.
    pub(crate) fn run(mut self, tree: &Mutex<Tree>) -> Result<(), DbError> {
        let resolved = {
            let tree = lock_tree(tree);
            tree.lookup_directory(&self.uri)
                .and_then(|id| Some((id, tree.directory(id)?.mtime())))
        };

        let Some((id, mtime)) = resolved else {
            return self.run_song(tree);
        };

        if self.recursive {
            if let Some(visit) = self.directory.as_mut() {
                let dir = DirectoryRef {
                    id,
                    uri: &self.uri,
                    mtime,
                };
                visit(&dir)?;
            }
        }

        let tree = lock_tree(tree);
        if tree.directory(id).is_none() {
            // removed between the lookup and this lock
            return Err(DbError::DirectoryNotFound(self.uri));
        }
        let uri = self.uri.clone();
        let result = self.walk(&tree, id, &uri);
        drop(tree);
        result.map_err(DbError::from)
    }

    /// The starting path is not a directory; try it as a song.
    fn run_song(mut self, tree: &Mutex<Tree>) -> Result<(), DbError> {
        if self.song.is_some() {
            let found = {
                let tree = lock_tree(tree);
                tree.lookup_song(&self.uri)
                    .and_then(|(dir, song)| Some((tree.uri(dir)?, song.clone())))
            };
            if let Some((directory, song)) = found {
                if self.accepts(&song) {
                    if let Some(visit) = self.song.as_mut() {
                        return Ok(visit(&SongRef {
                            directory: &directory,
                            song: &song,
                        })?);
                    }
                }
            }
        }
        Err(DbError::DirectoryNotFound(self.uri))
    }

    /// Songs, then playlists, then child directories of `id`, descending when recursive.
    /// The caller holds the lock for the whole call.
    fn walk(&mut self, tree: &Tree, id: DirectoryId, uri: &str) -> Result<(), VisitError> {
        let Some(dir) = tree.directory(id) else {
            return Ok(());
        };

        if let Some(visit) = self.song.as_mut() {
            for song in dir.songs() {
                if self.filter.as_ref().map_or(true, |f| f(song)) {
                    visit(&SongRef {
                        directory: uri,
                        song,
                    })?;
                }
            }
        }

        if let Some(visit) = self.playlist.as_mut() {
            for playlist in dir.playlists() {
                visit(&PlaylistRef {
                    directory: uri,
                    playlist,
                })?;
            }
        }

        for &child_id in dir.children() {
            let Some(child) = tree.directory(child_id) else {
                continue;
            };
            let child_uri = join_uri(uri, child.name());
            if let Some(visit) = self.directory.as_mut() {
                visit(&DirectoryRef {
                    id: child_id,
                    uri: &child_uri,
                    mtime: child.mtime(),
                })?;
            }
            if self.recursive {
                self.walk(tree, child_id, &child_uri)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Selection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("uri", &self.uri)
            .field("recursive", &self.recursive)
            .field("filter", &self.filter.is_some())
            .field("directory", &self.directory.is_some())
            .field("song", &self.song.is_some())
            .field("playlist", &self.playlist.is_some())
            .finish()
    }
}

/// Failure reported by a visitor callback. The engine stops at the first one.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct VisitError(Box<dyn Error + Send + Sync>);

impl VisitError {
    pub fn new(error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self(error.into())
    }

    pub fn into_inner(self) -> Box<dyn Error + Send + Sync> {
        self.0
    }
}
