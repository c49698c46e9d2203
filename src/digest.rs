//! Content comparison by MD5 digest
//!
//! Files are compared purely by the hash of their bytes. Size and
//! modification time are never consulted, so a file touched without changing
//! its content is still considered in sync.

use crate::error::{Result, SyncError};
use md5::{Digest, Md5};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size used while hashing
pub const CHUNK_SIZE: usize = 8192;

/// MD5 digest of a file's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileDigest([u8; 16]);

impl FileDigest {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Hash everything a reader yields, chunk by chunk
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<FileDigest> {
    let mut hasher = Md5::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hasher.finalize());
    Ok(FileDigest(bytes))
}

/// Compute the digest of the file at `path`
pub fn file_digest(path: &Path) -> Result<FileDigest> {
    let file = File::open(path).map_err(|e| SyncError::io(path, "opening", e))?;
    digest_reader(file).map_err(|e| SyncError::io(path, "reading", e))
}

/// Whether two files hold identical bytes
pub fn same_content(a: &Path, b: &Path) -> Result<bool> {
    Ok(file_digest(a)? == file_digest(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).expect("Failed to write test file");
        path
    }

    #[test]
    fn test_known_md5_values() {
        let empty = digest_reader(&b""[..]).unwrap();
        assert_eq!(empty.to_string(), "d41d8cd98f00b204e9800998ecf8427e");

        let hello = digest_reader(&b"hello"[..]).unwrap();
        assert_eq!(hello.to_string(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_digest_spans_multiple_chunks() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let chunked = digest_reader(&data[..]).unwrap();

        let mut hasher = Md5::new();
        hasher.update(&data);
        assert_eq!(&chunked.as_bytes()[..], &hasher.finalize()[..]);
    }

    #[test]
    fn test_same_content_compares_files() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.txt", b"hello");
        let b = write_file(&dir, "b.txt", b"hello");
        let c = write_file(&dir, "c.txt", b"hellO");

        assert!(same_content(&a, &b).unwrap());
        assert!(!same_content(&a, &c).unwrap());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.txt");

        let err = file_digest(&missing).unwrap_err();
        assert_matches!(err, SyncError::Io { operation: "opening", .. });
    }

    #[quickcheck]
    fn prop_identical_bytes_identical_digest(data: Vec<u8>) -> bool {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.bin", &data);
        let b = write_file(&dir, "b.bin", &data);
        file_digest(&a).unwrap() == file_digest(&b).unwrap()
    }

    #[quickcheck]
    fn prop_single_byte_change_changes_digest(data: Vec<u8>, index: usize, delta: u8) -> TestResult {
        if data.is_empty() || delta == 0 {
            return TestResult::discard();
        }

        let mut changed = data.clone();
        let index = index % changed.len();
        changed[index] = changed[index].wrapping_add(delta);

        let original = digest_reader(&data[..]).unwrap();
        let modified = digest_reader(&changed[..]).unwrap();
        TestResult::from_bool(original != modified)
    }
}
