use std::{
    fmt,
    fs::File,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
};

use sha1::{Digest, Sha1};
use snafu::{ResultExt, Snafu};

use crate::ext::BestEffortPathExt;

/// Files are streamed through the digest in chunks of this size.
pub const CHUNK_SIZE: usize = 64 * 1024;

const DIGEST_LEN: usize = 20;

/// SHA-1 fingerprint of a file's full byte stream.
///
/// Depends only on content: two files with identical bytes have identical
/// identities regardless of mtime, permissions or location.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentIdentity([u8; DIGEST_LEN]);

impl ContentIdentity {
    /// Streams `path` through SHA-1. The file handle is closed before returning.
    pub fn of(path: &Path) -> Result<Self, IdentityError> {
        let mut file = File::open(path).context(OpenSnafu {
            path: path.to_path_buf(),
        })?;

        let mut hasher = Sha1::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let read = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(err).context(ReadSnafu {
                        path: path.to_path_buf(),
                    });
                }
            };
            hasher.update(&chunk[..read]);
        }

        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&hasher.finalize());
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentIdentity({})", self.to_hex())
    }
}

/// Something able to fingerprint a file. The reconciler only talks to this
/// seam, so the hashing strategy can be swapped or observed.
pub trait IdentitySource {
    fn identity(&self, path: &Path) -> Result<ContentIdentity, IdentityError>;
}

impl<T: IdentitySource + ?Sized> IdentitySource for &T {
    fn identity(&self, path: &Path) -> Result<ContentIdentity, IdentityError> {
        (**self).identity(path)
    }
}

/// Hashes every request from scratch; nothing is remembered between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1Identity;

impl IdentitySource for Sha1Identity {
    fn identity(&self, path: &Path) -> Result<ContentIdentity, IdentityError> {
        ContentIdentity::of(path)
    }
}

#[derive(Debug, Snafu)]
pub enum IdentityError {
    #[snafu(display("Failed to open {} for hashing", path.best_effort_path_display()))]
    OpenError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to read {} while hashing", path.best_effort_path_display()))]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
}
