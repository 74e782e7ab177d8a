//! Library totals, gathered with a single recursive visit from the root.

use std::time::SystemTime;

use serde::Serialize;

use crate::database::{DbError, SimpleDatabase};
use crate::visit::Selection;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Directories below the root.
    pub directories: usize,
    pub songs: usize,
    pub playlists: usize,
    /// When the database file was last loaded or saved.
    #[serde(skip)]
    pub updated: Option<SystemTime>,
}

pub fn collect(db: &SimpleDatabase) -> Result<DatabaseStats, DbError> {
    let mut stats = DatabaseStats {
        updated: db.mtime(),
        ..DatabaseStats::default()
    };
    let selection = Selection::new("")
        .recursive(true)
        .on_directory(|dir| {
            if !dir.uri().is_empty() {
                stats.directories += 1;
            }
            Ok(())
        })
        .on_song(|_| {
            stats.songs += 1;
            Ok(())
        })
        .on_playlist(|_| {
            stats.playlists += 1;
            Ok(())
        });
    db.visit(selection)?;
    Ok(stats)
}
