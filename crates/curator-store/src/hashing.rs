//! Content digests for files and directory trees
//!
//! The federation's digest is MD5, streamed so multi-gigabyte payloads
//! never sit in memory. A directory tree hashes as a canonical archive:
//! every regular file, walked in sorted relative-path order, contributes
//!
//! ```text
//! relative-path bytes | NUL | u64-le size | content
//! ```
//!
//! to a single digest. The ordering makes the digest independent of
//! filesystem iteration order, and the embedded path and size make moves
//! and truncations visible. No archive container is written to disk.
//!
//! All functions here are synchronous; async callers run them on the
//! blocking pool.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use walkdir::WalkDir;

use curator_core::domain::ContentHash;

/// Read-buffer size for streaming hashes
const BUF_SIZE: usize = 128 * 1024;

/// Streams one regular file into the digest context
fn consume_file(context: &mut md5::Context, path: &Path) -> io::Result<u64> {
    let mut reader = fs::File::open(path)?;
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
        total += n as u64;
    }
    Ok(total)
}

/// Digest and size of a single regular file
pub fn hash_file(path: &Path) -> io::Result<(ContentHash, u64)> {
    let mut context = md5::Context::new();
    let size = consume_file(&mut context, path)?;
    let digest = context.compute();
    let hash = ContentHash::new(format!("{digest:x}"))
        .expect("md5 digest always formats as 32 hex chars");
    Ok((hash, size))
}

/// Canonical-archive digest and cumulative size of a directory tree
///
/// Symlinks are not followed; a payload carrying one fails the hash rather
/// than silently capturing whatever it points at.
pub fn hash_directory(root: &Path) -> io::Result<(ContentHash, u64)> {
    let mut entries: Vec<(String, std::path::PathBuf)> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if file_type.is_symlink() {
            return Err(io::Error::other(format!(
                "payload contains a symlink: {}",
                entry.path().display()
            )));
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .to_string_lossy()
            .into_owned();
        entries.push((relative, entry.path().to_path_buf()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut context = md5::Context::new();
    let mut total = 0u64;
    for (relative, path) in &entries {
        let size = fs::metadata(path)?.len();
        context.consume(relative.as_bytes());
        context.consume([0u8]);
        context.consume(size.to_le_bytes());
        let streamed = consume_file(&mut context, path)?;
        debug_assert_eq!(streamed, size);
        total += size;
    }

    let digest = context.compute();
    let hash = ContentHash::new(format!("{digest:x}"))
        .expect("md5 digest always formats as 32 hex chars");
    Ok((hash, total))
}

/// Digest and size of a payload that may be a flat file or a directory tree
pub fn hash_payload(path: &Path) -> io::Result<(ContentHash, u64)> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        hash_directory(path)
    } else if metadata.is_file() {
        hash_file(path)
    } else {
        Err(io::Error::other(format!(
            "payload is neither a file nor a directory: {}",
            path.display()
        )))
    }
}

/// Cumulative size of a payload without hashing it
pub fn payload_size(path: &Path) -> io::Result<u64> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::other)?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();
        let (hash, size) = hash_file(&path).unwrap();
        assert_eq!(size, 0);
        // The well-known MD5 of the empty input.
        assert_eq!(hash.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_hash_file_content_sensitivity() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"hello\nhe").unwrap();
        fs::write(&b, b"hello\nhx").unwrap();
        let (hash_a, size_a) = hash_file(&a).unwrap();
        let (hash_b, _) = hash_file(&b).unwrap();
        assert_eq!(size_a, 8);
        assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn test_directory_hash_deterministic() {
        let build = |files: &[(&str, &[u8])]| {
            let dir = TempDir::new().unwrap();
            for (name, content) in files {
                let path = dir.path().join(name);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, content).unwrap();
            }
            dir
        };

        // Same content written in different order hashes identically.
        let d1 = build(&[("sub/x", b"xx"), ("a", b"aa")]);
        let d2 = build(&[("a", b"aa"), ("sub/x", b"xx")]);
        let (h1, s1) = hash_directory(d1.path()).unwrap();
        let (h2, s2) = hash_directory(d2.path()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(s1, 4);
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_directory_hash_sees_renames() {
        let dir1 = TempDir::new().unwrap();
        fs::write(dir1.path().join("a"), b"same").unwrap();
        let dir2 = TempDir::new().unwrap();
        fs::write(dir2.path().join("b"), b"same").unwrap();
        let (h1, _) = hash_directory(dir1.path()).unwrap();
        let (h2, _) = hash_directory(dir2.path()).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_payload_dispatch() {
        let dir = TempDir::new().unwrap();
        let flat = dir.path().join("flat");
        fs::write(&flat, b"data").unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();
        fs::write(tree.join("inner"), b"data").unwrap();

        let (flat_hash, flat_size) = hash_payload(&flat).unwrap();
        let (tree_hash, tree_size) = hash_payload(&tree).unwrap();
        assert_eq!(flat_size, 4);
        assert_eq!(tree_size, 4);
        // A flat file and a tree with the same bytes are different payloads.
        assert_ne!(flat_hash, tree_hash);
    }

    #[test]
    fn test_symlink_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        assert!(hash_directory(dir.path()).is_err());
    }
}
