//! Directory Scanner
//!
//! Walks a directory and reports how many non-directory entries it holds and
//! the modification time of the oldest one.
//!
//! Symlinks are never followed: a link counts as a file with its own
//! modification time, and recursive scans do not descend through linked
//! directories.

use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::trace;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// `oldest_mod_time` reported for a directory without files
pub const EMPTY_DIR_OLDEST_TIME: i64 = 0;

// =============================================================================
// Scan Result
// =============================================================================

/// Statistics for one scanned directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirStats {
    /// Number of non-directory entries
    pub file_count: i64,
    /// Oldest modification time in unix seconds, `None` when no files were seen
    pub oldest_mod_time: Option<i64>,
}

impl DirStats {
    /// Stats of a directory with no files
    pub fn empty() -> Self {
        Self {
            file_count: 0,
            oldest_mod_time: None,
        }
    }

    /// Oldest modification time, or [`EMPTY_DIR_OLDEST_TIME`] when empty
    pub fn oldest_or_sentinel(&self) -> i64 {
        self.oldest_mod_time.unwrap_or(EMPTY_DIR_OLDEST_TIME)
    }

    fn record(&mut self, mtime: i64) {
        self.file_count += 1;
        self.oldest_mod_time = Some(match self.oldest_mod_time {
            Some(current) => current.min(mtime),
            None => mtime,
        });
    }
}

// =============================================================================
// Scanner Port
// =============================================================================

/// Computes [`DirStats`] for a path.
///
/// Implementations must be side-effect free apart from reads; the refresh
/// path calls them from the blocking thread pool.
pub trait DirectoryScanner: Send + Sync {
    fn scan(&self, path: &Path, recursive: bool) -> Result<DirStats>;
}

/// Scanner backed by the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsScanner;

impl FsScanner {
    pub fn new() -> Self {
        Self
    }
}

impl DirectoryScanner for FsScanner {
    fn scan(&self, path: &Path, recursive: bool) -> Result<DirStats> {
        let root = fs::metadata(path).map_err(|e| Error::path_access(path, e))?;
        if !root.is_dir() {
            return Err(Error::path_access(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }

        let mut walker = WalkDir::new(path).follow_links(false).min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut stats = DirStats::empty();
        for entry in walker {
            let entry = entry.map_err(|e| walk_error(path, e))?;
            if entry.file_type().is_dir() {
                continue;
            }

            // not followed, so this is the link's own metadata
            let metadata = entry.metadata().map_err(|e| walk_error(path, e))?;
            let modified = metadata
                .modified()
                .map_err(|e| Error::path_access(entry.path(), e))?;
            let mtime = unix_seconds(modified);

            trace!(path = %entry.path().display(), mtime, "counted file");
            stats.record(mtime);
        }

        Ok(stats)
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    Error::path_access(path, err.into())
}

/// Whole seconds since the unix epoch; negative for earlier times
pub fn unix_seconds(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path, mtime: i64) {
        let file = File::create(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime as u64))
            .unwrap();
    }

    #[test]
    fn test_counts_and_oldest() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a.log"), 300);
        touch(&dir.path().join("b.log"), 100);
        touch(&dir.path().join("c.log"), 200);

        let stats = FsScanner::new().scan(dir.path(), false).unwrap();

        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.oldest_mod_time, Some(100));
        assert_eq!(stats.oldest_or_sentinel(), 100);
    }

    #[test]
    fn test_empty_directory_uses_sentinel() {
        let dir = tempdir().unwrap();

        let stats = FsScanner::new().scan(dir.path(), true).unwrap();

        assert_eq!(stats, DirStats::empty());
        assert_eq!(stats.file_count, 0);
        assert_eq!(stats.oldest_or_sentinel(), EMPTY_DIR_OLDEST_TIME);
    }

    #[test]
    fn test_non_recursive_skips_subdirectories() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("top.txt"), 500);
        fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested").join("deep.txt"), 50);

        let stats = FsScanner::new().scan(dir.path(), false).unwrap();

        // the subdirectory itself is not a file
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.oldest_mod_time, Some(500));
    }

    #[test]
    fn test_recursive_walks_subtree() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("top.txt"), 500);
        fs::create_dir_all(dir.path().join("a").join("b")).unwrap();
        touch(&dir.path().join("a").join("one.txt"), 400);
        touch(&dir.path().join("a").join("b").join("two.txt"), 50);

        let stats = FsScanner::new().scan(dir.path(), true).unwrap();

        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.oldest_mod_time, Some(50));
    }

    #[test]
    fn test_recursive_deep_tree() {
        let dir = tempdir().unwrap();
        let mut deep = dir.path().to_path_buf();
        for _ in 0..256 {
            deep.push("d");
        }
        fs::create_dir_all(&deep).unwrap();
        touch(&deep.join("leaf.txt"), 7);
        touch(&dir.path().join("d").join("shallow.txt"), 70);

        let stats = FsScanner::new().scan(dir.path(), true).unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.oldest_mod_time, Some(7));

        let top = FsScanner::new().scan(dir.path(), false).unwrap();
        assert_eq!(top, DirStats::empty());
    }

    #[test]
    fn test_recursive_only_empty_subdirectories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x").join("y")).unwrap();

        let stats = FsScanner::new().scan(dir.path(), true).unwrap();
        assert_eq!(stats.file_count, 0);
        assert_eq!(stats.oldest_mod_time, None);
    }

    #[test]
    fn test_missing_path_is_access_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        let result = FsScanner::new().scan(&missing, false);

        assert_matches!(result, Err(Error::PathAccess { ref path, .. }) if path == &missing);
    }

    #[test]
    fn test_file_path_is_access_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        touch(&file, 10);

        assert_matches!(
            FsScanner::new().scan(&file, false),
            Err(Error::PathAccess { .. })
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_count_as_files() {
        let dir = tempdir().unwrap();
        let target = tempdir().unwrap();
        touch(&target.path().join("inside.txt"), 10);
        std::os::unix::fs::symlink(target.path(), dir.path().join("link")).unwrap();

        let stats = FsScanner::new().scan(dir.path(), true).unwrap();

        // the link is counted, its target is not traversed
        assert_eq!(stats.file_count, 1);
    }

    #[test]
    fn test_unix_seconds() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(unix_seconds(t), 1_700_000_000);
        assert_eq!(unix_seconds(SystemTime::UNIX_EPOCH), 0);
    }
}
