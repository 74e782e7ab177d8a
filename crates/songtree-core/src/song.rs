//! Leaf entities stored in the tree: songs (with their tags) and playlists.
//!
//! Tag names and values are opaque here. The scanner that creates songs decides
//! what they mean; the core only stores and persists them.

use serde::Serialize;

/// One `name: value` metadata pair attached to a song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A song file known to the index. `uri` is relative to the owning directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Song {
    pub uri: String,
    /// Last modification time of the file, seconds since the Unix epoch.
    pub mtime: u64,
    pub tags: Vec<Tag>,
}

impl Song {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mtime: 0,
            tags: Vec::new(),
        }
    }

    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Append a tag. Repeated names are allowed (e.g. several `Artist` values).
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    /// First value of the tag called `name`, if any.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }
}

/// A stored playlist file. Its contents live outside the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub name: String,
    pub mtime: u64,
}

impl Playlist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mtime: 0,
        }
    }

    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_returns_first_value() {
        let song = Song::new("a.flac")
            .with_tag("Artist", "One")
            .with_tag("Artist", "Two");
        assert_eq!(song.tag("Artist"), Some("One"));
        assert_eq!(song.tag("Album"), None);
    }
}
