//! Deterministic directory traversal.
//!
//! The raw store is verified by hashing every file under its data directory,
//! so the walk order must not depend on how the filesystem enumerates entries.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Information about a regular file discovered during walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the walk root, always `/`-separated
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = relative_slash_path(&path, root);

        Ok(Self {
            path,
            relative_path,
            size: metadata.len(),
        })
    }
}

/// Join the components of `path` below `root` with forward slashes.
fn relative_slash_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk a directory tree and collect every regular file, sorted by relative path.
///
/// Symlinks are not followed. A root that does not exist or is not a
/// directory yields an empty list.
///
/// # Example
/// ```no_run
/// use cache_mirror::fs::walker::walk_files;
/// use std::path::Path;
///
/// let files = walk_files(Path::new("cache/data")).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_files(root: &Path) -> std::io::Result<Vec<FileInfo>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;

        if !entry.file_type().is_file() {
            continue;
        }

        files.push(FileInfo::from_entry(&entry, root)?);
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok(files)
}

/// Calculate total size of all regular files in a directory
pub fn calculate_total_size(root: &Path) -> std::io::Result<u64> {
    Ok(walk_files(root)?.iter().map(|f| f.size).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_files(temp_dir.path())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_missing_root() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_files(&temp_dir.path().join("missing"))?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_is_sorted_with_forward_slashes() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("b/nested"))?;
        fs::write(temp_dir.path().join("b/nested/z.dat"), b"z")?;
        fs::write(temp_dir.path().join("c.dat"), b"c")?;
        fs::write(temp_dir.path().join("a.dat"), b"a")?;

        let files = walk_files(temp_dir.path())?;
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.dat", "b/nested/z.dat", "c.dat"]);

        Ok(())
    }

    #[test]
    fn test_calculate_total_size() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::write(temp_dir.path().join("file1.dat"), b"12345")?; // 5 bytes
        fs::write(temp_dir.path().join("file2.dat"), b"1234567")?; // 7 bytes

        let total = calculate_total_size(temp_dir.path())?;
        assert_eq!(total, 12);

        Ok(())
    }
}
