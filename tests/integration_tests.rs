#![cfg(unix)]
/// Integration tests for centralink
///
/// These drive the library the way the binary does: validate the two folders,
/// consolidate, then revert, checking the filesystem after every step.
///
/// Test categories:
/// 1. Consolidation and ordering
/// 2. Revert round trips
/// 3. Collisions and duplicates
/// 4. Interrupted batches
use centralink::cli::{consolidate, revert_after_interrupt, revert_tree, validate_folders};
use centralink::config::{CollisionPolicy, Config, DEFAULT_LOG_FILE_NAME, OrderPolicy};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// A playlist folder and an empty central repository side by side in one temp dir.
struct TestFixture {
    _temp_dir: TempDir,
    repository: PathBuf,
    playlists: PathBuf,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir(temp_dir.path().join("central")).expect("Failed to create repository");
        fs::create_dir(temp_dir.path().join("playlists")).expect("Failed to create playlists");

        let (repository, playlists) = validate_folders(
            &temp_dir.path().join("central"),
            &temp_dir.path().join("playlists"),
        )
        .expect("Fixture folders should be valid");

        TestFixture {
            _temp_dir: temp_dir,
            repository,
            playlists,
        }
    }

    /// Create a file under the playlist folder, creating parent folders as needed.
    fn create_file(&self, rel_path: &str, content: &[u8]) -> PathBuf {
        let path = self.playlists.join(rel_path);
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create playlist folder");
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    fn repo_file(&self, name: &str) -> PathBuf {
        self.repository.join(name)
    }

    fn consolidate(&self, config: &Config) -> centralink::TransitionReport {
        consolidate(&self.repository, &self.playlists, config, &|| false)
            .expect("Consolidation should succeed")
    }

    fn revert(&self) -> centralink::RevertReport {
        revert_tree(&self.repository, &self.playlists, &Config::default())
            .expect("Revert should succeed")
    }

    /// Assert `path` is a link that resolves to the repository file of the same name.
    fn assert_linked(&self, path: &Path) {
        let meta = fs::symlink_metadata(path).expect("Entry should exist");
        assert!(
            meta.file_type().is_symlink(),
            "Should be a link: {}",
            path.display()
        );
        let expected = self.repo_file(path.file_name().unwrap().to_str().unwrap());
        assert_eq!(fs::read_link(path).unwrap(), expected);
    }

    /// Assert `path` is a regular file (not a link) with the given content.
    fn assert_regular_file(&self, path: &Path, content: &[u8]) {
        let meta = fs::symlink_metadata(path).expect("Entry should exist");
        assert!(meta.is_file(), "Should be a regular file: {}", path.display());
        assert_eq!(fs::read(path).unwrap(), content);
    }

    /// Names of the regular files directly under the repository, sorted.
    fn repository_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.repository)
            .expect("Failed to read repository")
            .filter_map(|entry| {
                entry.ok().and_then(|e| {
                    if e.file_type().ok()?.is_file() {
                        Some(e.file_name().to_string_lossy().to_string())
                    } else {
                        None
                    }
                })
            })
            .collect();
        names.sort();
        names
    }
}

fn traversal_config() -> Config {
    let mut config = Config::default();
    config.discovery.order = OrderPolicy::Traversal;
    config
}

// ============================================================================
// Test Suite 1: Consolidation and Ordering
// ============================================================================

#[test]
fn test_consolidate_empty_playlist_folder() {
    let fixture = TestFixture::new();

    let report = fixture.consolidate(&Config::default());

    assert!(report.transitions.is_empty());
    assert!(report.failures.is_empty());
    assert!(!report.interrupted);
    assert!(fixture.repository_names().is_empty());
}

#[test]
fn test_two_playlists_consolidated_in_creation_order() {
    let fixture = TestFixture::new();
    // "z_" and "a_" folder names keep name order and creation order apart.
    let a = fixture.create_file("z_road_trip/a.txt", b"first");
    sleep(Duration::from_millis(50));
    let b = fixture.create_file("a_workout/b.txt", b"second");

    let report = fixture.consolidate(&Config::default());

    assert_eq!(report.transitions.len(), 2);
    assert_eq!(report.moved_paths(), vec![a.as_path(), b.as_path()]);
    assert_eq!(fixture.repository_names(), vec!["a.txt", "b.txt"]);
    fixture.assert_linked(&a);
    fixture.assert_linked(&b);
    assert_eq!(fs::read(&a).unwrap(), b"first");
    assert_eq!(fs::read(&b).unwrap(), b"second");
}

#[test]
fn test_creation_order_independent_of_folder_layout() {
    let fixture = TestFixture::new();
    let mut created = Vec::new();
    for (rel, content) in [
        ("c/deep/nested/t1.mp3", b"1"),
        ("a/t2.mp3", b"2"),
        ("b/t3.mp3", b"3"),
    ] {
        created.push(fixture.create_file(rel, content));
        sleep(Duration::from_millis(50));
    }

    let report = fixture.consolidate(&Config::default());

    let processed: Vec<&Path> = report.moved_paths();
    let expected: Vec<&Path> = created.iter().map(|p| p.as_path()).collect();
    assert_eq!(processed, expected);
}

#[test]
fn test_every_file_ends_up_once_in_repository_and_linked() {
    let fixture = TestFixture::new();
    let files = [
        fixture.create_file("rock/one.flac", b"one"),
        fixture.create_file("rock/live/two.flac", b"two"),
        fixture.create_file("jazz/three.flac", b"three"),
        fixture.create_file("four.flac", b"four"),
    ];

    let report = fixture.consolidate(&traversal_config());

    assert_eq!(report.transitions.len(), files.len());
    assert_eq!(
        fixture.repository_names(),
        vec!["four.flac", "one.flac", "three.flac", "two.flac"]
    );
    for file in &files {
        fixture.assert_linked(file);
    }
}

#[test]
fn test_log_file_is_not_consolidated() {
    let fixture = TestFixture::new();
    let log = fixture.create_file(DEFAULT_LOG_FILE_NAME, b"2024-01-01 INFO started");
    let song = fixture.create_file("rock/song.mp3", b"song");

    let report = fixture.consolidate(&Config::default());

    assert_eq!(report.moved_paths(), vec![song.as_path()]);
    fixture.assert_regular_file(&log, b"2024-01-01 INFO started");
    assert_eq!(fixture.repository_names(), vec!["song.mp3"]);
}

#[test]
fn test_second_run_finds_nothing_to_do() {
    let fixture = TestFixture::new();
    let song = fixture.create_file("rock/song.mp3", b"song");

    fixture.consolidate(&Config::default());
    let second = fixture.consolidate(&Config::default());

    assert!(second.transitions.is_empty());
    assert!(second.failures.is_empty());
    fixture.assert_linked(&song);
}

#[test]
fn test_excluded_patterns_stay_in_place() {
    let fixture = TestFixture::new();
    let playlist_file = fixture.create_file("rock/mix.m3u", b"#EXTM3U");
    let song = fixture.create_file("rock/song.mp3", b"song");

    let mut config = Config::default();
    config.discovery.exclude_patterns = vec!["**/*.m3u".to_string()];
    let report = fixture.consolidate(&config);

    assert_eq!(report.moved_paths(), vec![song.as_path()]);
    fixture.assert_regular_file(&playlist_file, b"#EXTM3U");
}

// ============================================================================
// Test Suite 2: Revert Round Trips
// ============================================================================

#[test]
fn test_revert_restores_tree_byte_for_byte() {
    let fixture = TestFixture::new();
    let binary: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let files = [
        (fixture.create_file("rock/a.bin", &binary), binary.clone()),
        (fixture.create_file("jazz/b.txt", b"plain text\n"), b"plain text\n".to_vec()),
        (fixture.create_file("c.dat", b""), Vec::new()),
    ];

    let report = fixture.consolidate(&Config::default());
    assert_eq!(report.transitions.len(), 3);

    let reverted = fixture.revert();

    assert_eq!(reverted.restored.len(), 3);
    assert!(reverted.is_complete_success());
    for (path, content) in &files {
        fixture.assert_regular_file(path, content);
    }
    assert!(fixture.repository_names().is_empty());
}

#[test]
fn test_revert_twice_is_idempotent() {
    let fixture = TestFixture::new();
    let song = fixture.create_file("rock/song.mp3", b"song");
    fixture.consolidate(&Config::default());

    let first = fixture.revert();
    let second = fixture.revert();

    assert_eq!(first.restored.len(), 1);
    assert_eq!(second.total_processed(), 0);
    fixture.assert_regular_file(&song, b"song");
}

#[test]
fn test_revert_leaves_other_repository_files_alone() {
    let fixture = TestFixture::new();
    fs::write(fixture.repo_file("unrelated.mp3"), b"someone else's").unwrap();
    let song = fixture.create_file("rock/song.mp3", b"song");
    fixture.consolidate(&Config::default());

    fixture.revert();

    fixture.assert_regular_file(&song, b"song");
    assert_eq!(fixture.repository_names(), vec!["unrelated.mp3"]);
}

// ============================================================================
// Test Suite 3: Collisions and Duplicates
// ============================================================================

#[test]
fn test_collision_replaces_repository_copy() {
    let fixture = TestFixture::new();
    fs::write(fixture.repo_file("song.mp3"), b"repository version").unwrap();
    let song = fixture.create_file("rock/song.mp3", b"playlist version");

    let report = fixture.consolidate(&Config::default());

    assert_eq!(report.transitions.len(), 1);
    assert_eq!(
        fs::read(fixture.repo_file("song.mp3")).unwrap(),
        b"playlist version"
    );
    fixture.assert_linked(&song);
}

#[test]
fn test_collision_skip_policy_reports_failure() {
    let fixture = TestFixture::new();
    fs::write(fixture.repo_file("song.mp3"), b"repository version").unwrap();
    let song = fixture.create_file("rock/song.mp3", b"playlist version");
    let other = fixture.create_file("rock/other.mp3", b"other");

    let mut config = Config::default();
    config.transition.on_collision = CollisionPolicy::Skip;
    let report = fixture.consolidate(&config);

    assert_eq!(report.moved_paths(), vec![other.as_path()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, song);
    fixture.assert_regular_file(&song, b"playlist version");
    assert_eq!(
        fs::read(fixture.repo_file("song.mp3")).unwrap(),
        b"repository version"
    );
}

#[test]
fn test_duplicates_across_playlists_share_one_repository_file() {
    let fixture = TestFixture::new();
    let first = fixture.create_file("road_trip/anthem.mp3", b"same track");
    let second = fixture.create_file("workout/anthem.mp3", b"same track");

    let report = fixture.consolidate(&Config::default());

    assert_eq!(report.transitions.len(), 2);
    assert_eq!(fixture.repository_names(), vec!["anthem.mp3"]);
    fixture.assert_linked(&first);
    fixture.assert_linked(&second);

    let reverted = fixture.revert();

    assert_eq!(reverted.restored.len(), 2);
    fixture.assert_regular_file(&first, b"same track");
    fixture.assert_regular_file(&second, b"same track");
    assert!(fixture.repository_names().is_empty());
}

// ============================================================================
// Test Suite 4: Interrupted Batches
// ============================================================================

#[test]
fn test_interrupt_after_two_files_reverts_only_those() {
    let fixture = TestFixture::new();
    let mut files = Vec::new();
    for i in 0..5 {
        files.push(fixture.create_file(&format!("list_{}/track_{}.mp3", i, i), b"audio"));
        sleep(Duration::from_millis(20));
    }

    let polls = std::cell::Cell::new(0);
    let interrupt_after_two = || {
        polls.set(polls.get() + 1);
        polls.get() > 2
    };

    let report = consolidate(
        &fixture.repository,
        &fixture.playlists,
        &Config::default(),
        &interrupt_after_two,
    )
    .expect("Consolidation should succeed");

    assert!(report.interrupted);
    assert_eq!(report.moved_paths(), vec![files[0].as_path(), files[1].as_path()]);

    let reverted = fixture.revert();

    let mut restored = reverted.restored.clone();
    restored.sort();
    assert_eq!(restored, vec![files[0].clone(), files[1].clone()]);
    for file in &files {
        fixture.assert_regular_file(file, b"audio");
    }
    assert!(fixture.repository_names().is_empty());
}

#[test]
fn test_interrupt_leaves_untransitioned_namesakes_untouched() {
    let fixture = TestFixture::new();
    fs::write(fixture.repo_file("track_4.mp3"), b"library copy").unwrap();
    let mut files = Vec::new();
    for i in 0..5 {
        let content = format!("mine {}", i);
        files.push(fixture.create_file(&format!("list_{}/track_{}.mp3", i, i), content.as_bytes()));
        sleep(Duration::from_millis(20));
    }

    let polls = std::cell::Cell::new(0);
    let interrupt_after_two = || {
        polls.set(polls.get() + 1);
        polls.get() > 2
    };
    let mut config = Config::default();
    config.revert.reconcile_plain_files = true;

    let report = consolidate(
        &fixture.repository,
        &fixture.playlists,
        &config,
        &interrupt_after_two,
    )
    .expect("Consolidation should succeed");
    assert!(report.interrupted);

    let reverted = revert_after_interrupt(&fixture.repository, &fixture.playlists, &config)
        .expect("Revert should succeed");

    let mut restored = reverted.restored.clone();
    restored.sort();
    assert_eq!(restored, vec![files[0].clone(), files[1].clone()]);
    for (i, file) in files.iter().enumerate() {
        fixture.assert_regular_file(file, format!("mine {}", i).as_bytes());
    }
    assert_eq!(
        fs::read(fixture.repo_file("track_4.mp3")).unwrap(),
        b"library copy"
    );

    // A later manual revert with reconciliation on still refuses to swap in other bytes.
    let again = revert_tree(&fixture.repository, &fixture.playlists, &config)
        .expect("Revert should succeed");
    assert!(again.restored.is_empty());
    fixture.assert_regular_file(&files[4], b"mine 4");
}

#[test]
fn test_revert_keeps_file_left_in_place_by_skip_policy() {
    let fixture = TestFixture::new();
    fs::write(fixture.repo_file("song.mp3"), b"repository version").unwrap();
    let song = fixture.create_file("rock/song.mp3", b"playlist version");

    let mut config = Config::default();
    config.transition.on_collision = CollisionPolicy::Skip;
    fixture.consolidate(&config);
    fixture.revert();

    config.revert.reconcile_plain_files = true;
    revert_tree(&fixture.repository, &fixture.playlists, &config).expect("Revert should succeed");

    fixture.assert_regular_file(&song, b"playlist version");
    assert_eq!(
        fs::read(fixture.repo_file("song.mp3")).unwrap(),
        b"repository version"
    );
}
