//! In-memory index of a media library: a tree of directories holding songs and
//! playlists, persisted to one text file and queried by path.
//!
//! Filesystem scanning, tag reading and match expressions live elsewhere; this
//! crate stores what scanners put into the tree (see [`SimpleDatabase::lock`])
//! and answers queries about it (see [`Selection`]).

pub mod app_data;
pub mod config;
pub mod database;
pub mod song;
pub mod stats;
pub mod store;
pub mod tree;
pub mod visit;

pub use app_data::app_data_dir;
pub use config::{default_config_path, load_config, set_database_path, Config, ConfigError, DatabaseConfig};
pub use database::{DbError, SimpleDatabase};
pub use song::{Playlist, Song, Tag};
pub use stats::DatabaseStats;
pub use store::{ParseError, StoreError};
pub use tree::{Directory, DirectoryId, Tree, TreeError, MAX_DEPTH};
pub use visit::{DirectoryRef, PlaylistRef, Selection, SongRef, VisitError};
