use std::{
    collections::HashMap,
    ffi::OsString,
    fs::{self, Metadata},
    io,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu};

use crate::ext::BestEffortPathExt;
use crate::sync::content_identity::{IdentityError, IdentitySource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Only produced by [`Links::Keep`] listings.
    Symlink,
}

/// How a listing treats symbolic links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Links {
    /// Classify by the link target. A link that cannot be followed lists as
    /// a file of the link's own size.
    Follow,
    /// Classify the link itself, so it is never descended into.
    Keep,
}

/// One child of a directory, as seen by a single listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: OsString,
    pub kind: EntryKind,
    /// Byte length, zero for directories.
    pub len: u64,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn display_name(&self) -> String {
        self.name.to_string_lossy().into_owned()
    }
}

/// Lists the direct children of `dir`, sorted by name.
///
/// Entries that vanish between the directory read and their metadata lookup
/// are left out.
pub fn list_dir(dir: &Path, links: Links) -> Result<Vec<DirectoryEntry>, ListError> {
    let read_dir = fs::read_dir(dir).context(ReadDirSnafu {
        path: dir.to_path_buf(),
    })?;

    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.context(ReadDirSnafu {
            path: dir.to_path_buf(),
        })?;
        let path = entry.path();
        let Some(metadata) = entry_metadata(&path, links).context(MetadataSnafu { path: &path })?
        else {
            continue;
        };

        let kind = if links == Links::Keep && metadata.file_type().is_symlink() {
            EntryKind::Symlink
        } else if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        entries.push(DirectoryEntry {
            name: entry.file_name(),
            kind,
            len: if kind == EntryKind::Directory {
                0
            } else {
                metadata.len()
            },
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// `None` when nothing exists at `path` any more.
fn entry_metadata(path: &Path, links: Links) -> io::Result<Option<Metadata>> {
    let metadata = match links {
        Links::Follow => fs::metadata(path).or_else(|_| fs::symlink_metadata(path)),
        Links::Keep => fs::symlink_metadata(path),
    };
    match metadata {
        Ok(metadata) => Ok(Some(metadata)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Snafu)]
pub enum ListError {
    #[snafu(display("Failed to list directory {}", path.best_effort_path_display()))]
    ReadDirError {
        path: PathBuf,
        source: io::Error,
    },
    #[snafu(display("Failed to read metadata of {}", path.best_effort_path_display()))]
    MetadataError {
        path: PathBuf,
        source: io::Error,
    },
}

/// A source file whose fingerprint (or its replica's) could not be computed.
#[derive(Debug)]
pub struct Undecided {
    pub entry: DirectoryEntry,
    pub error: IdentityError,
}

/// Partition of one directory level.
///
/// `copy_new` holds files and directories missing (or of the wrong kind) on
/// the destination side; `descend` holds directories present on both sides.
#[derive(Debug, Default)]
pub struct SyncDecision {
    pub copy_new: Vec<DirectoryEntry>,
    pub copy_stale: Vec<DirectoryEntry>,
    pub unchanged: Vec<DirectoryEntry>,
    pub remove: Vec<DirectoryEntry>,
    pub descend: Vec<DirectoryEntry>,
    pub undecided: Vec<Undecided>,
}

/// Classifies a single directory level.
pub struct TreeDiffer<'a, I: IdentitySource> {
    identity: &'a I,
}

impl<'a, I: IdentitySource> TreeDiffer<'a, I> {
    pub fn new(identity: &'a I) -> Self {
        Self { identity }
    }

    /// `source` and `destination` are the listings of `source_dir` and
    /// `destination_dir`. Only equal-size file pairs are hashed.
    pub fn diff(
        &self,
        source_dir: &Path,
        source: &[DirectoryEntry],
        destination_dir: &Path,
        destination: &[DirectoryEntry],
    ) -> SyncDecision {
        let mut decision = SyncDecision::default();

        let mut removal_candidates: HashMap<&OsString, &DirectoryEntry> =
            destination.iter().map(|entry| (&entry.name, entry)).collect();

        for entry in source {
            let Some(existing) = removal_candidates.remove(&entry.name) else {
                decision.copy_new.push(entry.clone());
                continue;
            };

            if existing.kind != entry.kind {
                decision.remove.push(existing.clone());
                decision.copy_new.push(entry.clone());
                continue;
            }

            if entry.is_dir() {
                decision.descend.push(entry.clone());
                continue;
            }

            if existing.len != entry.len {
                decision.copy_stale.push(entry.clone());
                continue;
            }

            match self.same_content(
                &source_dir.join(&entry.name),
                &destination_dir.join(&entry.name),
            ) {
                Ok(true) => decision.unchanged.push(entry.clone()),
                Ok(false) => decision.copy_stale.push(entry.clone()),
                Err(error) => decision.undecided.push(Undecided {
                    entry: entry.clone(),
                    error,
                }),
            }
        }

        // Keep destination order for the leftovers.
        decision.remove.extend(
            destination
                .iter()
                .filter(|entry| removal_candidates.contains_key(&entry.name))
                .cloned(),
        );

        decision
    }

    fn same_content(&self, source: &Path, destination: &Path) -> Result<bool, IdentityError> {
        let source_identity = self.identity.identity(source)?;
        let destination_identity = self.identity.identity(destination)?;
        Ok(source_identity == destination_identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::content_identity::{ContentIdentity, Sha1Identity};
    use std::cell::Cell;
    use tempfile::TempDir;

    struct CountingIdentity {
        calls: Cell<usize>,
    }

    impl IdentitySource for CountingIdentity {
        fn identity(&self, path: &Path) -> Result<ContentIdentity, IdentityError> {
            self.calls.set(self.calls.get() + 1);
            ContentIdentity::of(path)
        }
    }

    fn trees() -> (TempDir, PathBuf, PathBuf) {
        let root = TempDir::new().expect("Failed to create temp directory");
        let source = root.path().join("source");
        let replica = root.path().join("replica");
        fs::create_dir(&source).expect("Failed to create source");
        fs::create_dir(&replica).expect("Failed to create replica");
        (root, source, replica)
    }

    fn names(entries: &[DirectoryEntry]) -> Vec<String> {
        entries.iter().map(DirectoryEntry::display_name).collect()
    }

    fn diff_with<I: IdentitySource>(identity: &I, source: &Path, replica: &Path) -> SyncDecision {
        let source_entries = list_dir(source, Links::Follow).expect("Failed to list source");
        let replica_entries = list_dir(replica, Links::Keep).expect("Failed to list replica");
        TreeDiffer::new(identity).diff(source, &source_entries, replica, &replica_entries)
    }

    fn is_noop(decision: &SyncDecision) -> bool {
        decision.copy_new.is_empty()
            && decision.copy_stale.is_empty()
            && decision.remove.is_empty()
            && decision.undecided.is_empty()
    }

    #[test]
    fn list_dir_sorts_and_classifies() {
        let (_root, source, _) = trees();
        fs::write(source.join("b.txt"), "12345").unwrap();
        fs::create_dir(source.join("a")).unwrap();

        let entries = list_dir(&source, Links::Follow).unwrap();

        assert_eq!(names(&entries), vec!["a", "b.txt"]);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].len, 5);
    }

    #[test]
    fn list_dir_of_missing_directory_fails() {
        let (root, _, _) = trees();

        let result = list_dir(&root.path().join("missing"), Links::Follow);

        assert!(matches!(result, Err(ListError::ReadDirError { .. })));
    }

    #[test]
    fn missing_destination_entries_are_copy_new() {
        let (_root, source, replica) = trees();
        fs::write(source.join("a.txt"), "0123456789").unwrap();
        fs::create_dir(source.join("sub")).unwrap();

        let decision = diff_with(&Sha1Identity, &source, &replica);

        assert_eq!(names(&decision.copy_new), vec!["a.txt", "sub"]);
        assert!(decision.remove.is_empty());
        assert!(decision.descend.is_empty());
    }

    #[test]
    fn extra_destination_entries_are_removed() {
        let (_root, source, replica) = trees();
        fs::write(source.join("a.txt"), "a").unwrap();
        fs::write(replica.join("a.txt"), "a").unwrap();
        fs::write(replica.join("b.txt"), "b").unwrap();
        fs::create_dir(replica.join("old")).unwrap();

        let decision = diff_with(&Sha1Identity, &source, &replica);

        assert_eq!(names(&decision.remove), vec!["b.txt", "old"]);
        assert_eq!(names(&decision.unchanged), vec!["a.txt"]);
    }

    #[test]
    fn size_mismatch_skips_hashing() {
        let (_root, source, replica) = trees();
        fs::write(source.join("a.txt"), "012345678901").unwrap();
        fs::write(replica.join("a.txt"), "0123456789").unwrap();
        let identity = CountingIdentity {
            calls: Cell::new(0),
        };

        let decision = diff_with(&identity, &source, &replica);

        assert_eq!(names(&decision.copy_stale), vec!["a.txt"]);
        assert_eq!(identity.calls.get(), 0);
    }

    #[test]
    fn equal_size_different_content_is_stale() {
        let (_root, source, replica) = trees();
        fs::write(source.join("a.txt"), "new!").unwrap();
        fs::write(replica.join("a.txt"), "old!").unwrap();
        let identity = CountingIdentity {
            calls: Cell::new(0),
        };

        let decision = diff_with(&identity, &source, &replica);

        assert_eq!(names(&decision.copy_stale), vec!["a.txt"]);
        assert_eq!(identity.calls.get(), 2);
    }

    #[test]
    fn identical_files_are_unchanged() {
        let (_root, source, replica) = trees();
        fs::write(source.join("a.txt"), "same").unwrap();
        fs::write(replica.join("a.txt"), "same").unwrap();

        let decision = diff_with(&Sha1Identity, &source, &replica);

        assert_eq!(names(&decision.unchanged), vec!["a.txt"]);
        assert!(is_noop(&decision));
    }

    #[test]
    fn kind_mismatch_removes_and_recreates() {
        let (_root, source, replica) = trees();
        fs::create_dir(source.join("x")).unwrap();
        fs::write(replica.join("x"), "file").unwrap();
        fs::write(source.join("y"), "file").unwrap();
        fs::create_dir(replica.join("y")).unwrap();

        let decision = diff_with(&Sha1Identity, &source, &replica);

        assert_eq!(names(&decision.remove), vec!["x", "y"]);
        assert_eq!(names(&decision.copy_new), vec!["x", "y"]);
        assert_eq!(decision.copy_new[0].kind, EntryKind::Directory);
        assert_eq!(decision.copy_new[1].kind, EntryKind::File);
    }

    #[test]
    fn shared_directories_are_descended_not_compared() {
        let (_root, source, replica) = trees();
        fs::create_dir(source.join("sub")).unwrap();
        fs::create_dir(replica.join("sub")).unwrap();
        let identity = CountingIdentity {
            calls: Cell::new(0),
        };

        let decision = diff_with(&identity, &source, &replica);

        assert_eq!(names(&decision.descend), vec!["sub"]);
        assert_eq!(identity.calls.get(), 0);
        assert!(is_noop(&decision));
    }

    #[test]
    fn hashing_failure_leaves_entry_undecided() {
        struct FailingIdentity;
        impl IdentitySource for FailingIdentity {
            fn identity(&self, path: &Path) -> Result<ContentIdentity, IdentityError> {
                Err(IdentityError::ReadError {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "boom"),
                })
            }
        }

        let (_root, source, replica) = trees();
        fs::write(source.join("a.txt"), "same").unwrap();
        fs::write(replica.join("a.txt"), "same").unwrap();

        let decision = diff_with(&FailingIdentity, &source, &replica);

        assert_eq!(decision.undecided.len(), 1);
        assert_eq!(decision.undecided[0].entry.display_name(), "a.txt");
        assert!(decision.copy_stale.is_empty());
        assert!(decision.unchanged.is_empty());
    }

    #[test]
    fn vanished_entry_counts_as_absent() {
        let (root, _, _) = trees();

        for links in [Links::Follow, Links::Keep] {
            let metadata = entry_metadata(&root.path().join("gone"), links).unwrap();
            assert!(metadata.is_none());
        }
    }

    #[cfg(unix)]
    #[test]
    fn replica_links_are_listed_as_links() {
        let (root, source, replica) = trees();
        let outside = root.path().join("outside");
        fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, replica.join("sub")).unwrap();
        std::os::unix::fs::symlink(&outside, source.join("sub")).unwrap();

        let kept = list_dir(&replica, Links::Keep).unwrap();
        let followed = list_dir(&source, Links::Follow).unwrap();

        assert_eq!(kept[0].kind, EntryKind::Symlink);
        assert_eq!(followed[0].kind, EntryKind::Directory);
    }

    #[cfg(unix)]
    #[test]
    fn replica_link_in_place_of_directory_is_replaced() {
        let (root, source, replica) = trees();
        let outside = root.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::create_dir(source.join("sub")).unwrap();
        std::os::unix::fs::symlink(&outside, replica.join("sub")).unwrap();

        let decision = diff_with(&Sha1Identity, &source, &replica);

        assert_eq!(names(&decision.remove), vec!["sub"]);
        assert_eq!(names(&decision.copy_new), vec!["sub"]);
        assert!(decision.descend.is_empty());
    }
}
