//! CRC32 checksums over buffers and whole directory trees.
//!
//! The directory checksum guards the downloaded raw store across restarts: a
//! store whose bytes no longer match the value saved after download is
//! treated as stale and fetched again.

use crc32fast::Hasher;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::fs::walker::walk_files;

/// CRC32 of `bytes`, zero-extended.
pub fn checksum(bytes: &[u8]) -> u64 {
    u64::from(crc32fast::hash(bytes))
}

/// CRC32 over every regular file below `root`.
///
/// Files are visited in lexicographic order of their `/`-separated relative
/// paths; for each one the path bytes and then the content bytes are fed into
/// a single running hasher. A missing or non-directory root hashes nothing.
pub fn checksum_directory(root: &Path) -> u64 {
    let mut hasher = Hasher::new();

    let files = match walk_files(root) {
        Ok(files) => files,
        Err(e) => {
            warn!("Failed to walk {} for checksum: {}", root.display(), e);
            return u64::from(hasher.finalize());
        }
    };

    let mut buffer = vec![0u8; 64 * 1024];
    for file in &files {
        hasher.update(file.relative_path.as_bytes());

        let mut handle = match fs::File::open(&file.path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Skipping unreadable file {}: {}", file.path.display(), e);
                continue;
            }
        };

        loop {
            match handle.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buffer[..n]),
                Err(e) => {
                    warn!("Read error in {}: {}", file.path.display(), e);
                    break;
                }
            }
        }
    }

    let value = u64::from(hasher.finalize());
    debug!("Checksummed {} files under {}: {}", files.len(), root.display(), value);
    value
}

/// Read a stored directory checksum. `None` when absent or unparsable.
pub fn read_checksum(checksum_file: &Path) -> Option<u64> {
    let content = fs::read_to_string(checksum_file).ok()?;
    content.trim().parse::<u64>().ok()
}

/// True when `checksum_file` holds the current checksum of `dir`.
pub fn verify_integrity(dir: &Path, checksum_file: &Path) -> bool {
    match read_checksum(checksum_file) {
        Some(stored) => stored == checksum_directory(dir),
        None => false,
    }
}

/// Compute the checksum of `dir` and write it as decimal text.
pub fn save_checksum(dir: &Path, checksum_file: &Path) -> std::io::Result<u64> {
    let value = checksum_directory(dir);
    if let Some(parent) = checksum_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(checksum_file, value.to_string())?;
    Ok(value)
}
