//! The directory tree: directories owning songs, playlists and child directories.
//!
//! Directories live in an arena owned by [`Tree`] and are addressed by
//! [`DirectoryId`]. A parent owns its children through its `children` list; the
//! `parent` field is only a back-reference. Removing a subtree frees its slots
//! and bumps their generation, so an id kept across the removal resolves to
//! nothing rather than to whatever reuses the slot.
//!
//! The tree itself does no locking. Callers sharing it go through
//! [`crate::SimpleDatabase::lock`].

use std::mem;

use crate::song::{Playlist, Song};

/// Deepest directory level below the root that [`Tree::add_child`] accepts.
/// Walks over the tree recurse once per level, so this also bounds their stack use.
pub const MAX_DEPTH: usize = 128;

/// Stable handle to a directory inside one [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectoryId {
    index: u32,
    generation: u32,
}

/// One path segment of the library.
#[derive(Debug, Clone)]
pub struct Directory {
    name: String,
    parent: Option<DirectoryId>,
    children: Vec<DirectoryId>,
    songs: Vec<Song>,
    playlists: Vec<Playlist>,
    mtime: u64,
}

impl Directory {
    fn new(name: String, parent: Option<DirectoryId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            songs: Vec::new(),
            playlists: Vec::new(),
            mtime: 0,
        }
    }

    /// Path segment; empty only for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<DirectoryId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn children(&self) -> &[DirectoryId] {
        &self.children
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    /// Advisory modification time, seconds since the Unix epoch. Only scanners read it.
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// True when there is nothing below this directory at all.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.songs.is_empty() && self.playlists.is_empty()
    }

    pub fn song(&self, uri: &str) -> Option<&Song> {
        self.songs.iter().find(|s| s.uri == uri)
    }

    pub fn playlist(&self, name: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.name == name)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    directory: Option<Directory>,
}

/// Arena of directories with exactly one root.
#[derive(Debug)]
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: DirectoryId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree holding only an empty root.
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                directory: Some(Directory::new(String::new(), None)),
            }],
            free: Vec::new(),
            root: DirectoryId {
                index: 0,
                generation: 0,
            },
        }
    }

    pub fn root(&self) -> DirectoryId {
        self.root
    }

    /// Resolve an id. `None` once the directory has been removed.
    pub fn directory(&self, id: DirectoryId) -> Option<&Directory> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.directory.as_ref()
    }

    fn directory_mut(&mut self, id: DirectoryId) -> Option<&mut Directory> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.directory.as_mut()
    }

    fn get_mut(&mut self, id: DirectoryId) -> Result<&mut Directory, TreeError> {
        self.directory_mut(id).ok_or(TreeError::StaleDirectory)
    }

    pub fn parent(&self, id: DirectoryId) -> Option<DirectoryId> {
        self.directory(id)?.parent
    }

    /// True when the root has no children, songs or playlists.
    pub fn is_empty(&self) -> bool {
        self.directory(self.root).map_or(true, Directory::is_empty)
    }

    /// Number of live directories, root included.
    pub fn directory_count(&self) -> usize {
        self.slots.iter().filter(|s| s.directory.is_some()).count()
    }

    /// Full URI of a directory: names from below the root down to it, joined by `/`.
    pub fn uri(&self, id: DirectoryId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = self.directory(id)?;
        while let Some(parent) = current.parent {
            names.push(current.name.as_str());
            current = self.directory(parent)?;
        }
        names.reverse();
        Some(names.join("/"))
    }

    /// Number of ancestors: 0 for the root.
    pub fn depth(&self, id: DirectoryId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(parent) = current {
            depth += 1;
            current = self.parent(parent);
        }
        depth
    }

    pub fn child(&self, parent: DirectoryId, name: &str) -> Option<DirectoryId> {
        let dir = self.directory(parent)?;
        dir.children
            .iter()
            .copied()
            .find(|&c| self.directory(c).is_some_and(|d| d.name == name))
    }

    /// Create a new, empty child directory.
    pub fn add_child(&mut self, parent: DirectoryId, name: &str) -> Result<DirectoryId, TreeError> {
        validate_name(name)?;
        if self.directory(parent).is_none() {
            return Err(TreeError::StaleDirectory);
        }
        if self.child(parent, name).is_some() {
            return Err(TreeError::DuplicateDirectory(name.to_string()));
        }
        if self.depth(parent) >= MAX_DEPTH {
            return Err(TreeError::TooDeep(name.to_string()));
        }
        let id = self.alloc(Directory::new(name.to_string(), Some(parent)));
        self.get_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Walk `uri` from the root, creating missing directories on the way.
    pub fn ensure_directory(&mut self, uri: &str) -> Result<DirectoryId, TreeError> {
        let mut id = self.root;
        if uri.is_empty() {
            return Ok(id);
        }
        for segment in uri.split('/') {
            id = match self.child(id, segment) {
                Some(child) => child,
                None => self.add_child(id, segment)?,
            };
        }
        Ok(id)
    }

    /// Remove a child directory and everything below it. Returns false if there was none.
    pub fn remove_child(&mut self, parent: DirectoryId, name: &str) -> bool {
        let Some(child) = self.child(parent, name) else {
            return false;
        };
        if let Some(dir) = self.directory_mut(parent) {
            dir.children.retain(|&c| c != child);
        }
        self.release(child);
        true
    }

    pub fn add_song(&mut self, dir: DirectoryId, song: Song) -> Result<(), TreeError> {
        validate_name(&song.uri)?;
        let dir = self.get_mut(dir)?;
        if dir.song(&song.uri).is_some() {
            return Err(TreeError::DuplicateSong(song.uri));
        }
        dir.songs.push(song);
        Ok(())
    }

    pub fn remove_song(&mut self, dir: DirectoryId, uri: &str) -> Option<Song> {
        let dir = self.directory_mut(dir)?;
        let pos = dir.songs.iter().position(|s| s.uri == uri)?;
        Some(dir.songs.remove(pos))
    }

    pub fn add_playlist(&mut self, dir: DirectoryId, playlist: Playlist) -> Result<(), TreeError> {
        validate_name(&playlist.name)?;
        let dir = self.get_mut(dir)?;
        if dir.playlist(&playlist.name).is_some() {
            return Err(TreeError::DuplicatePlaylist(playlist.name));
        }
        dir.playlists.push(playlist);
        Ok(())
    }

    pub fn remove_playlist(&mut self, dir: DirectoryId, name: &str) -> Option<Playlist> {
        let dir = self.directory_mut(dir)?;
        let pos = dir.playlists.iter().position(|p| p.name == name)?;
        Some(dir.playlists.remove(pos))
    }

    pub fn set_mtime(&mut self, dir: DirectoryId, mtime: u64) -> Result<(), TreeError> {
        self.get_mut(dir)?.mtime = mtime;
        Ok(())
    }

    /// Resolve a `/`-separated directory URI. The empty string is the root.
    pub fn lookup_directory(&self, uri: &str) -> Option<DirectoryId> {
        let mut id = self.root;
        if uri.is_empty() {
            return Some(id);
        }
        for segment in uri.split('/') {
            id = self.child(id, segment)?;
        }
        Some(id)
    }

    /// Resolve a song by its full URI (directory URI plus the song's own URI).
    pub fn lookup_song(&self, uri: &str) -> Option<(DirectoryId, &Song)> {
        let (dir_uri, name) = uri.rsplit_once('/').unwrap_or(("", uri));
        let id = self.lookup_directory(dir_uri)?;
        let song = self.directory(id)?.song(name)?;
        Some((id, song))
    }

    /// Remove every directory that holds no songs or playlists, directly or below it.
    /// The root always stays.
    pub fn prune_empty(&mut self) {
        self.prune_from(self.root);
    }

    fn prune_from(&mut self, id: DirectoryId) {
        let Some(dir) = self.directory_mut(id) else {
            return;
        };
        let children = mem::take(&mut dir.children);
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            self.prune_from(child);
            if self.directory(child).is_some_and(Directory::is_empty) {
                self.release(child);
            } else {
                kept.push(child);
            }
        }
        if let Some(dir) = self.directory_mut(id) {
            dir.children = kept;
        }
    }

    /// Order children, songs and playlists of every directory by name (byte order).
    pub fn sort(&mut self) {
        self.sort_from(self.root);
    }

    fn sort_from(&mut self, id: DirectoryId) {
        let Some(dir) = self.directory_mut(id) else {
            return;
        };
        dir.songs.sort_by(|a, b| a.uri.cmp(&b.uri));
        dir.playlists.sort_by(|a, b| a.name.cmp(&b.name));
        let mut children = mem::take(&mut dir.children);
        children.sort_by(|&a, &b| self.name_of(a).cmp(self.name_of(b)));
        for &child in &children {
            self.sort_from(child);
        }
        if let Some(dir) = self.directory_mut(id) {
            dir.children = children;
        }
    }

    fn name_of(&self, id: DirectoryId) -> &str {
        self.directory(id).map_or("", Directory::name)
    }

    fn alloc(&mut self, directory: Directory) -> DirectoryId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.directory = Some(directory);
            return DirectoryId {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            directory: Some(directory),
        });
        DirectoryId {
            index,
            generation: 0,
        }
    }

    /// Free `id` and its whole subtree. The caller unlinks it from its parent.
    fn release(&mut self, id: DirectoryId) {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return;
        };
        if slot.generation != id.generation {
            return;
        }
        let Some(dir) = slot.directory.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        for child in dir.children {
            self.release(child);
        }
    }
}

/// Append one segment to a directory URI. The root's URI is the empty string.
pub(crate) fn join_uri(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Names are single path segments: non-empty, no `/`, no line breaks.
pub(crate) fn validate_name(name: &str) -> Result<(), TreeError> {
    if name.is_empty() || name.contains(['/', '\n', '\r']) {
        return Err(TreeError::InvalidName(name.to_string()));
    }
    Ok(())
}


#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("duplicate directory: {0}")]
    DuplicateDirectory(String),
    #[error("duplicate song: {0}")]
    DuplicateSong(String),
    #[error("duplicate playlist: {0}")]
    DuplicatePlaylist(String),
    #[error("directory nested too deeply: {0}")]
    TooDeep(String),
    #[error("directory no longer exists")]
    StaleDirectory,
}
