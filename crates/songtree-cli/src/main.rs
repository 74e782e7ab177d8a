//! CLI entry point for songtree: inspect, query and populate a database file.

mod scan;

use std::cell::RefCell;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use songtree_core::{
    default_config_path, load_config, set_database_path, stats, DatabaseConfig, Selection,
    SimpleDatabase, Tag,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "songtree")]
#[command(about = "songtree: persistent index of a music library")]
struct Cli {
    /// Config file to read (default: config.toml in the app data directory).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Database file to use, overriding the config.
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Remember PATH as the database file in the config.
    Init {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Check that the database file can be read and written (or created).
    Check,
    /// Count directories, songs and playlists.
    Stats,
    /// List the entries directly inside a directory.
    Ls {
        #[arg(value_name = "URI", default_value = "")]
        uri: String,
    },
    /// List every song below a directory, optionally filtered.
    Find {
        #[arg(value_name = "URI", default_value = "")]
        uri: String,
        /// Only songs whose URI or any tag value contains this text (case-insensitive).
        #[arg(long)]
        contains: Option<String>,
    },
    /// Show one song.
    Song {
        #[arg(value_name = "URI")]
        uri: String,
    },
    /// Add the songs and playlists found under a music directory, then save.
    Import {
        #[arg(value_name = "MUSIC_DIR")]
        music_dir: PathBuf,
    },
}

/// One listed entry, as printed by `ls`, `find` and `song`.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Entry {
    Directory { uri: String, mtime: u64 },
    Song { uri: String, mtime: u64, tags: Vec<Tag> },
    Playlist { uri: String, mtime: u64 },
}

impl Entry {
    fn print(&self) {
        match self {
            Entry::Directory { uri, .. } => println!("directory: {uri}"),
            Entry::Song { uri, tags, .. } => {
                println!("file: {uri}");
                for tag in tags {
                    println!("  {}: {}", tag.name, tag.value);
                }
            }
            Entry::Playlist { uri, .. } => println!("playlist: {uri}"),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let mut message = e.to_string();
            let mut source = e.source();
            while let Some(cause) = source {
                message.push_str(&format!(": {cause}"));
                source = cause.source();
            }
            eprintln!("Error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let json = cli.json;
    let command = cli.command.unwrap_or(Commands::Stats);

    if let Commands::Init { path } = &command {
        let config_path = config_path(cli.config)?;
        set_database_path(&config_path, path)?;
        println!("{}", config_path.display());
        return Ok(());
    }

    let db_config = match cli.db {
        Some(path) => DatabaseConfig::new(path.to_string_lossy()),
        None => load_config(&config_path(cli.config)?)?.database,
    };
    let mut db = SimpleDatabase::configure(&db_config)?;

    if let Commands::Check = command {
        db.check()?;
        println!("{}: ok", db.path().display());
        return Ok(());
    }

    db.open()?;
    match command {
        Commands::Init { .. } | Commands::Check => {}
        Commands::Stats => {
            let stats = stats::collect(&db)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("directories: {}", stats.directories);
                println!("songs:       {}", stats.songs);
                println!("playlists:   {}", stats.playlists);
            }
        }
        Commands::Ls { uri } => {
            let entries = RefCell::new(Vec::new());
            db.visit(collect_into(&entries, Selection::new(uri)))?;
            print_entries(&entries.into_inner(), json)?;
        }
        Commands::Find { uri, contains } => {
            let needle = contains.map(|s| s.to_lowercase());
            let entries = RefCell::new(Vec::new());
            let selection = Selection::new(uri)
                .recursive(true)
                .matching(move |song| match &needle {
                    None => true,
                    Some(needle) => {
                        song.uri.to_lowercase().contains(needle)
                            || song.tags.iter().any(|t| t.value.to_lowercase().contains(needle))
                    }
                });
            let entries_ref = &entries;
            db.visit(selection.on_song(move |s| {
                entries_ref.borrow_mut().push(song_entry(&s.uri(), s.song()));
                Ok(())
            }))?;
            print_entries(&entries.into_inner(), json)?;
        }
        Commands::Song { uri } => {
            let song = db.get_song(&uri)?;
            print_entries(&[song_entry(&uri, &song)], json)?;
        }
        Commands::Import { music_dir } => {
            let summary = scan::import(&db, &music_dir)?;
            db.save()?;
            println!(
                "Imported {} song(s), {} playlist(s) in {} director(ies) from {} ({} skipped)",
                summary.songs,
                summary.playlists,
                summary.directories,
                music_dir.display(),
                summary.skipped
            );
        }
    }
    db.close();
    Ok(())
}

fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf, Box<dyn Error>> {
    match explicit {
        Some(path) => Ok(path),
        None => default_config_path().ok_or_else(|| "could not determine app data directory".into()),
    }
}

/// Record every directory, song and playlist the selection reaches.
fn collect_into<'a>(entries: &'a RefCell<Vec<Entry>>, selection: Selection<'a>) -> Selection<'a> {
    selection
        .on_directory(move |d| {
            entries.borrow_mut().push(Entry::Directory {
                uri: d.uri().to_string(),
                mtime: d.mtime(),
            });
            Ok(())
        })
        .on_song(move |s| {
            entries.borrow_mut().push(song_entry(&s.uri(), s.song()));
            Ok(())
        })
        .on_playlist(move |p| {
            entries.borrow_mut().push(Entry::Playlist {
                uri: p.uri(),
                mtime: p.playlist().mtime,
            });
            Ok(())
        })
}

fn song_entry(uri: &str, song: &songtree_core::Song) -> Entry {
    Entry::Song {
        uri: uri.to_string(),
        mtime: song.mtime,
        tags: song.tags.clone(),
    }
}

fn print_entries(entries: &[Entry], json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
    } else {
        for entry in entries {
            entry.print();
        }
    }
    Ok(())
}
