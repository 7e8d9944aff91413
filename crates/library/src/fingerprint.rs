use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::CancelToken;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub content_hash: String,
    pub size_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("cannot read {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot hash {path:?}: {reason}")]
    HashCompute { path: PathBuf, reason: String },
    #[error("fingerprint canceled")]
    Canceled,
}

/// Streams every part through one blake3 hasher, checking `cancel` between
/// chunks. Each part is prefixed with its length so that moving bytes from
/// one file of a pair to the other changes the hash.
pub fn fingerprint(
    parts: &[&Path],
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<Fingerprint, FingerprintError> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    for part in parts {
        let read_err = |source| FingerprintError::FileRead {
            path: part.to_path_buf(),
            source,
        };
        let mut file = File::open(part).map_err(read_err)?;
        let declared = file.metadata().map_err(read_err)?.len();
        hasher.update(&declared.to_le_bytes());

        let mut read = 0u64;
        loop {
            if cancel.is_canceled() {
                return Err(FingerprintError::Canceled);
            }
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(read_err(err)),
            };
            hasher.update(&buffer[..n]);
            read += n as u64;
        }

        if read != declared {
            return Err(FingerprintError::HashCompute {
                path: part.to_path_buf(),
                reason: format!("size changed while reading ({} of {} bytes)", read, declared),
            });
        }
        total += read;
    }

    if total == 0 {
        return Err(FingerprintError::HashCompute {
            path: parts.first().map(|p| p.to_path_buf()).unwrap_or_default(),
            reason: "no content".to_string(),
        });
    }

    Ok(Fingerprint {
        content_hash: hasher.finalize().to_hex().to_string(),
        size_bytes: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn identical_bytes_share_a_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        fs::write(&a, vec![7u8; 200_000]).unwrap();
        fs::write(&b, vec![7u8; 200_000]).unwrap();

        let token = CancelToken::new();
        let first = fingerprint(&[&a], 4096, &token).unwrap();
        let second = fingerprint(&[&b], DEFAULT_CHUNK_SIZE, &token).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.size_bytes, 200_000);
    }

    #[test]
    fn pair_boundary_is_part_of_the_hash() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("s.mp3");
        let cdg = dir.path().join("s.cdg");
        fs::write(&audio, b"abc").unwrap();
        fs::write(&cdg, b"def").unwrap();
        let joined = dir.path().join("joined.mp4");
        fs::write(&joined, b"abcdef").unwrap();

        let token = CancelToken::new();
        let pair = fingerprint(&[&audio, &cdg], 2, &token).unwrap();
        let single = fingerprint(&[&joined], 2, &token).unwrap();
        assert_ne!(pair.content_hash, single.content_hash);
        assert_eq!(pair.size_bytes, 6);
    }

    #[test]
    fn empty_and_missing_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.mp4");
        fs::write(&empty, b"").unwrap();
        let token = CancelToken::new();

        assert!(matches!(
            fingerprint(&[&empty], 16, &token),
            Err(FingerprintError::HashCompute { .. })
        ));
        assert!(matches!(
            fingerprint(&[&dir.path().join("gone.mp4")], 16, &token),
            Err(FingerprintError::FileRead { .. })
        ));
    }

    #[test]
    fn canceled_token_stops_hashing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.mp4");
        fs::write(&path, vec![1u8; 10_000]).unwrap();
        let token = CancelToken::new();
        token.cancel();

        assert!(matches!(
            fingerprint(&[&path], 64, &token),
            Err(FingerprintError::Canceled)
        ));
    }
}
