//! Open/save/reopen cycles and shared use from several threads.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use songtree_core::{store, DatabaseConfig, Playlist, Selection, SimpleDatabase, Song};

fn open(path: &Path) -> SimpleDatabase {
    let mut db = SimpleDatabase::configure(&DatabaseConfig::new(path.to_string_lossy())).unwrap();
    db.open().unwrap();
    db
}

#[test]
fn reload_equals_pruned_and_sorted_tree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let db = open(&path);
    {
        let mut tree = db.lock();
        for (dir_uri, song) in [("z/2", "b.ogg"), ("z/2", "a.ogg"), ("m", "x.ogg"), ("a/1", "s.ogg")] {
            let id = tree.ensure_directory(dir_uri).unwrap();
            tree.add_song(id, Song::new(song).with_mtime(7).with_tag("Artist", dir_uri))
                .unwrap();
        }
        tree.ensure_directory("m/empty/also-empty").unwrap();
        let m = tree.lookup_directory("m").unwrap();
        tree.add_playlist(m, Playlist::new("m.m3u")).unwrap();
    }
    db.save().unwrap();
    let saved = fs::read(&path).unwrap();

    let reopened = open(&path);
    let rendered = {
        let mut tree = reopened.lock();
        assert!(tree.lookup_directory("m/empty").is_none());
        tree.sort();
        store::render(&tree).unwrap()
    };
    assert_eq!(rendered, saved);

    // saving again without changes is byte-identical
    reopened.save().unwrap();
    assert_eq!(fs::read(&path).unwrap(), saved);

    let song = reopened.get_song("z/2/a.ogg").unwrap();
    assert_eq!(song.mtime, 7);
    assert_eq!(song.tag("Artist"), Some("z/2"));
}

#[test]
fn saving_an_empty_library_writes_only_the_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let db = open(&path);
    {
        let mut tree = db.lock();
        tree.ensure_directory("a/b/c").unwrap();
        tree.ensure_directory("d").unwrap();
    }
    db.save().unwrap();
    assert!(db.lock().is_empty());
    let text = fs::read_to_string(&path).unwrap();
    assert!(!text.contains("directory:"));

    let reopened = open(&path);
    assert!(reopened.lock().is_empty());
    assert_eq!(reopened.lock().directory_count(), 1);
}

#[test]
fn unwritable_location_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, "").unwrap();
    let mut db =
        SimpleDatabase::configure(&DatabaseConfig::new(blocker.join("db").to_string_lossy())).unwrap();
    assert!(db.open().is_err());
}

#[cfg(unix)]
#[test]
fn read_only_parent_fails_to_open() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let locked = dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
    // privileged users ignore the mode bits; nothing to observe then
    let writable_anyway = fs::write(locked.join("probe"), "").is_ok();

    let mut db =
        SimpleDatabase::configure(&DatabaseConfig::new(locked.join("db").to_string_lossy())).unwrap();
    let result = db.open();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    if !writable_anyway {
        let err = result.unwrap_err();
        assert!(err.to_string().contains("can't create db file"), "{err}");
    }
}

#[test]
fn concurrent_visits_see_consistent_subtrees() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("db"));
    {
        let mut tree = db.lock();
        for i in 0..20 {
            let id = tree.ensure_directory(&format!("d{i}/inner")).unwrap();
            tree.add_song(id, Song::new("s.mp3")).unwrap();
        }
    }
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        // scanner: keeps replacing subtrees while holding the lock
        scope.spawn(|| {
            for round in 0..200 {
                let mut tree = db.lock();
                let root = tree.root();
                let name = format!("d{}", round % 20);
                tree.remove_child(root, &name);
                let id = tree.ensure_directory(&format!("{name}/inner")).unwrap();
                tree.add_song(id, Song::new("s.mp3")).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let mut dirs = 0;
                    let mut songs = 0;
                    let selection = Selection::new("")
                        .recursive(true)
                        .on_directory(|d| {
                            if !d.uri().is_empty() {
                                dirs += 1;
                            }
                            Ok(())
                        })
                        .on_song(|s| {
                            assert!(s.uri().ends_with("/inner/s.mp3"));
                            songs += 1;
                            Ok(())
                        });
                    db.visit(selection).unwrap();
                    assert_eq!(dirs, 40);
                    assert_eq!(songs, 20);
                }
            });
        }
    });
}

#[test]
fn concurrent_saves_all_succeed_and_keep_the_last_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let db = open(&path);

    std::thread::scope(|scope| {
        for writer in 0..4 {
            let db = &db;
            scope.spawn(move || {
                for round in 0..25 {
                    {
                        let mut tree = db.lock();
                        let id = tree.ensure_directory(&format!("w{writer}")).unwrap();
                        tree.add_song(id, Song::new(format!("{round}.mp3"))).unwrap();
                    }
                    db.save().unwrap();
                }
            });
        }
    });

    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, ["db"]);

    let reopened = open(&path);
    for writer in 0..4 {
        for round in 0..25 {
            assert!(reopened.find_song(&format!("w{writer}/{round}.mp3")).is_some());
        }
    }
}
