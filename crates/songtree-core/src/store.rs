//! Reading and writing the database file.
//!
//! The file is line oriented. A short `info_begin`/`info_end` header carries
//! the format number, then the root directory's body follows:
//!
//! ```text
//! info_begin
//! format: 1
//! version: 0.1.0
//! info_end
//! directory: Artist
//! mtime: 1700000000
//! begin: Artist
//! song_begin: 01.flac
//! mtime: 1700000000
//! Title: Intro
//! song_end
//! end: Artist
//! playlist_begin: mix.m3u
//! mtime: 1700000000
//! playlist_end
//! ```
//!
//! Unknown `key: value` fields are skipped on read. Inside a song every key
//! other than `mtime` is a tag and is carried as is.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::song::{Playlist, Song, Tag};
use crate::tree::{join_uri, DirectoryId, Tree};

/// Format number written in the header. Files carrying any other number are rejected.
pub const FORMAT_VERSION: u32 = 1;

/// Serialize `tree` in its current order. Call [`Tree::sort`] first for stable output.
pub fn write_tree<W: Write>(tree: &Tree, mut out: W) -> io::Result<()> {
    writeln!(out, "info_begin")?;
    writeln!(out, "format: {FORMAT_VERSION}")?;
    writeln!(out, "version: {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "info_end")?;
    write_directory(tree, tree.root(), "", &mut out)?;
    out.flush()
}

/// Serialize `tree` into memory.
pub fn render(tree: &Tree) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_tree(tree, &mut buf)?;
    Ok(buf)
}

fn write_directory<W: Write>(tree: &Tree, id: DirectoryId, uri: &str, out: &mut W) -> io::Result<()> {
    let Some(dir) = tree.directory(id) else {
        return Ok(());
    };
    for &child_id in dir.children() {
        let Some(child) = tree.directory(child_id) else {
            continue;
        };
        let child_uri = join_uri(uri, child.name());
        writeln!(out, "directory: {}", child.name())?;
        writeln!(out, "mtime: {}", child.mtime())?;
        writeln!(out, "begin: {child_uri}")?;
        write_directory(tree, child_id, &child_uri, out)?;
        writeln!(out, "end: {child_uri}")?;
    }
    for song in dir.songs() {
        write_song(song, out)?;
    }
    for playlist in dir.playlists() {
        writeln!(out, "playlist_begin: {}", playlist.name)?;
        writeln!(out, "mtime: {}", playlist.mtime)?;
        writeln!(out, "playlist_end")?;
    }
    Ok(())
}

fn write_song<W: Write>(song: &Song, out: &mut W) -> io::Result<()> {
    writeln!(out, "song_begin: {}", song.uri)?;
    writeln!(out, "mtime: {}", song.mtime)?;
    for tag in &song.tags {
        if !is_storable(tag) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("tag {:?} of song {:?} cannot be stored", tag.name, song.uri),
            ));
        }
        writeln!(out, "{}: {}", tag.name, tag.value)?;
    }
    writeln!(out, "song_end")
}

/// A tag survives a write/read cycle only if it cannot be mistaken for structure.
fn is_storable(tag: &Tag) -> bool {
    !tag.name.is_empty()
        && tag.name != "mtime"
        && !tag.name.contains([':', '\n', '\r'])
        && !tag.value.contains(['\n', '\r'])
}

/// Parse a whole database file. Either the complete tree is returned or nothing.
pub fn read_tree<R: BufRead>(reader: R) -> Result<Tree, StoreError> {
    let mut lines = LineReader {
        inner: reader.lines(),
        number: 0,
    };
    read_header(&mut lines)?;
    let mut tree = Tree::new();
    let root = tree.root();
    read_body(&mut lines, &mut tree, root, "")?;
    Ok(tree)
}

/// Open and parse the file at `path`.
pub fn load_file(path: &Path) -> Result<Tree, StoreError> {
    let file = File::open(path)?;
    read_tree(BufReader::new(file))
}

/// Replace `path` with `data` via a uniquely named sibling temp file, so a failed
/// write leaves the previous contents in place and concurrent writers never share
/// a temp file.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    // on failure the temp file is removed when the error drops it
    file.persist(path)?;
    Ok(())
}

struct LineReader<R> {
    inner: io::Lines<R>,
    number: usize,
}

impl<R: BufRead> LineReader<R> {
    fn next(&mut self) -> Result<Option<String>, StoreError> {
        match self.inner.next() {
            None => Ok(None),
            Some(line) => {
                self.number += 1;
                Ok(Some(line?))
            }
        }
    }

    /// Like `next`, but running out of input is an error.
    fn expect(&mut self, context: &str) -> Result<String, StoreError> {
        match self.next()? {
            Some(line) => Ok(line),
            None => Err(self.error(format!("unexpected end of file in {context}"))),
        }
    }

    fn error(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Parse(ParseError {
            line: self.number,
            reason: reason.into(),
        })
    }

    fn field<'l>(&self, line: &'l str) -> Result<(&'l str, &'l str), StoreError> {
        split_field(line).ok_or_else(|| self.error(format!("malformed line: {line:?}")))
    }

    fn mtime(&self, value: &str) -> Result<u64, StoreError> {
        value
            .parse()
            .map_err(|_| self.error(format!("invalid mtime: {value:?}")))
    }
}

/// Split `key: value`. The key is everything before the first colon.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    if key.is_empty() {
        return None;
    }
    Some((key, value.strip_prefix(' ').unwrap_or(value)))
}

fn read_header<R: BufRead>(lines: &mut LineReader<R>) -> Result<(), StoreError> {
    if lines.next()?.as_deref() != Some("info_begin") {
        return Err(lines.error("database format not recognized"));
    }
    let mut format = None;
    loop {
        let line = lines.expect("info block")?;
        if line == "info_end" {
            break;
        }
        let (key, value) = lines.field(&line)?;
        match key {
            "format" => {
                let number = value
                    .parse::<u32>()
                    .map_err(|_| lines.error(format!("invalid format number: {value:?}")))?;
                format = Some(number);
            }
            _ => debug!(key, line = lines.number, "ignoring unknown info field"),
        }
    }
    match format {
        Some(FORMAT_VERSION) => Ok(()),
        Some(other) => Err(lines.error(format!("unsupported database format {other}"))),
        None => Err(lines.error("database format number missing")),
    }
}

/// Read the contents of directory `id` until its `end:` line (or end of file for the root).
fn read_body<R: BufRead>(
    lines: &mut LineReader<R>,
    tree: &mut Tree,
    id: DirectoryId,
    uri: &str,
) -> Result<(), StoreError> {
    loop {
        let Some(line) = lines.next()? else {
            if uri.is_empty() {
                return Ok(());
            }
            return Err(lines.error(format!("unexpected end of file in directory {uri:?}")));
        };
        let (key, value) = lines.field(&line)?;
        match key {
            "directory" => read_directory(lines, tree, id, uri, value)?,
            "song_begin" => {
                let song = read_song(lines, value)?;
                tree.add_song(id, song)
                    .map_err(|e| lines.error(e.to_string()))?;
            }
            "playlist_begin" => {
                let playlist = read_playlist(lines, value)?;
                tree.add_playlist(id, playlist)
                    .map_err(|e| lines.error(e.to_string()))?;
            }
            "end" if uri.is_empty() => {
                return Err(lines.error("\"end\" outside of any directory"));
            }
            "end" if value != uri => {
                return Err(lines.error(format!("expected \"end: {uri}\", found {line:?}")));
            }
            "end" => return Ok(()),
            _ => debug!(key, line = lines.number, "ignoring unknown directory field"),
        }
    }
}

fn read_directory<R: BufRead>(
    lines: &mut LineReader<R>,
    tree: &mut Tree,
    parent: DirectoryId,
    parent_uri: &str,
    name: &str,
) -> Result<(), StoreError> {
    let id = tree
        .add_child(parent, name)
        .map_err(|e| lines.error(e.to_string()))?;
    let uri = join_uri(parent_uri, name);
    let mut mtime = 0;
    loop {
        let line = lines.expect("directory header")?;
        let (key, value) = lines.field(&line)?;
        match key {
            "mtime" => mtime = lines.mtime(value)?,
            "begin" if value == uri => break,
            "begin" => {
                return Err(lines.error(format!("expected \"begin: {uri}\", found {line:?}")));
            }
            _ => debug!(key, line = lines.number, "ignoring unknown directory field"),
        }
    }
    tree.set_mtime(id, mtime)
        .map_err(|e| lines.error(e.to_string()))?;
    read_body(lines, tree, id, &uri)
}

fn read_song<R: BufRead>(lines: &mut LineReader<R>, uri: &str) -> Result<Song, StoreError> {
    let mut song = Song::new(uri);
    loop {
        let line = lines.expect("song")?;
        if line == "song_end" {
            return Ok(song);
        }
        let (key, value) = lines.field(&line)?;
        match key {
            "mtime" => song.mtime = lines.mtime(value)?,
            _ => song.tags.push(Tag::new(key, value)),
        }
    }
}

fn read_playlist<R: BufRead>(lines: &mut LineReader<R>, name: &str) -> Result<Playlist, StoreError> {
    let mut playlist = Playlist::new(name);
    loop {
        let line = lines.expect("playlist")?;
        if line == "playlist_end" {
            return Ok(playlist);
        }
        let (key, value) = lines.field(&line)?;
        match key {
            "mtime" => playlist.mtime = lines.mtime(value)?,
            _ => debug!(key, line = lines.number, "ignoring unknown playlist field"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::tree::MAX_DEPTH;

    const HEADER: &str = "info_begin\nformat: 1\ninfo_end\n";

    fn parse(text: &str) -> Result<Tree, StoreError> {
        read_tree(text.as_bytes())
    }

    fn parse_error(text: &str) -> ParseError {
        match parse(text) {
            Err(StoreError::Parse(e)) => e,
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    fn sample() -> Tree {
        let mut tree = Tree::new();
        let album = tree.ensure_directory("Artist/Album").unwrap();
        tree.set_mtime(album, 1_700_000_000).unwrap();
        tree.add_song(
            album,
            Song::new("02.flac")
                .with_mtime(5)
                .with_tag("Title", "Second: the sequel")
                .with_tag("Artist", "Someone"),
        )
        .unwrap();
        tree.add_song(album, Song::new("01.flac").with_tag("Title", ""))
            .unwrap();
        let root = tree.root();
        tree.add_playlist(root, Playlist::new("mix.m3u").with_mtime(9))
            .unwrap();
        tree.sort();
        tree
    }

    #[test]
    fn read_back_what_was_written() {
        let tree = sample();
        let bytes = render(&tree).unwrap();
        let loaded = read_tree(bytes.as_slice()).unwrap();
        assert_eq!(render(&loaded).unwrap(), bytes);

        let (dir, song) = loaded.lookup_song("Artist/Album/02.flac").unwrap();
        assert_eq!(song.mtime, 5);
        assert_eq!(song.tag("Title"), Some("Second: the sequel"));
        assert_eq!(song.tag("Artist"), Some("Someone"));
        assert_eq!(loaded.directory(dir).unwrap().mtime(), 1_700_000_000);
        let (_, first) = loaded.lookup_song("Artist/Album/01.flac").unwrap();
        assert_eq!(first.tag("Title"), Some(""));
        let root = loaded.directory(loaded.root()).unwrap();
        assert_eq!(root.playlist("mix.m3u").unwrap().mtime, 9);
    }

    #[test]
    fn empty_tree_is_only_a_header() {
        let bytes = render(&Tree::new()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().last(), Some("info_end"));
        assert!(parse(&text).unwrap().is_empty());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let text = "info_begin\nformat: 1\ncharset: UTF-8\ninfo_end\n\
                    directory: a\nmtime: 3\nfuture: yes\nbegin: a\n\
                    flags: x\n\
                    playlist_begin: p.m3u\nowner: me\nplaylist_end\n\
                    end: a\n";
        let tree = parse(text).unwrap();
        let a = tree.lookup_directory("a").unwrap();
        assert_eq!(tree.directory(a).unwrap().mtime(), 3);
        assert!(tree.directory(a).unwrap().playlist("p.m3u").is_some());
    }

    #[test]
    fn missing_header_is_rejected() {
        let err = parse_error("directory: a\n");
        assert_eq!(err.line, 1);
        assert!(err.reason.contains("not recognized"));
        assert!(matches!(parse(""), Err(StoreError::Parse(_))));
    }

    #[test]
    fn other_format_numbers_are_rejected() {
        let err = parse_error("info_begin\nformat: 2\ninfo_end\n");
        assert!(err.reason.contains("unsupported"));
        let err = parse_error("info_begin\ninfo_end\n");
        assert!(err.reason.contains("missing"));
    }

    #[test]
    fn mismatched_end_reports_its_line() {
        let text = format!("{HEADER}directory: a\nmtime: 0\nbegin: a\nend: b\n");
        let err = parse_error(&text);
        assert_eq!(err.line, 7);
        assert!(err.reason.contains("end: a"));
    }

    #[test]
    fn truncated_file_fails_whole_load() {
        let text = format!("{HEADER}directory: a\nmtime: 0\nbegin: a\nsong_begin: x.mp3\nsong_end\n");
        let err = parse_error(&text);
        assert!(err.reason.contains("end of file"));

        let text = format!("{HEADER}song_begin: x.mp3\nTitle: y\n");
        assert!(parse_error(&text).reason.contains("end of file"));
    }

    #[test]
    fn duplicate_songs_are_rejected() {
        let text = format!("{HEADER}song_begin: x.mp3\nsong_end\nsong_begin: x.mp3\nsong_end\n");
        let err = parse_error(&text);
        assert_eq!(err.line, 7);
        assert!(err.reason.contains("duplicate song"));
    }

    #[test]
    fn garbage_lines_are_rejected() {
        let err = parse_error(&format!("{HEADER}what is this\n"));
        assert_eq!(err.line, 4);
        let err = parse_error(&format!("{HEADER}song_begin: x\nmtime: soon\nsong_end\n"));
        assert!(err.reason.contains("mtime"));
    }

    #[test]
    fn tags_that_cannot_round_trip_fail_the_write() {
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_song(root, Song::new("a.mp3").with_tag("Comment", "two\nlines"))
            .unwrap();
        let err = render(&tree).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut tree = Tree::new();
        tree.add_song(root, Song::new("a.mp3").with_tag("mtime", "1"))
            .unwrap();
        assert!(render(&tree).is_err());
    }

    #[test]
    fn nesting_beyond_max_depth_is_a_parse_error() {
        let mut text = HEADER.to_string();
        let mut uri = String::new();
        for _ in 0..=MAX_DEPTH {
            uri = join_uri(&uri, "a");
            text.push_str(&format!("directory: a\nmtime: 0\nbegin: {uri}\n"));
        }
        for _ in 0..=MAX_DEPTH {
            text.push_str(&format!("end: {uri}\n"));
            uri = uri.rsplit_once('/').map_or(String::new(), |(parent, _)| parent.to_string());
        }
        let err = parse_error(&text);
        assert_eq!(err.line, 3 + 3 * MAX_DEPTH + 1);
        assert!(err.reason.contains("too deeply"), "{err}");
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        fs::write(&path, "old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, ["db"]);
    }
}

/// Structural problem in a database file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}
