//! Filesystem baseline capture and diff. A baseline is the file table of
//! the container's rootfs image at create time; `docker diff` compares a
//! fresh enumeration against it. The host only reads the image after the
//! guest flushed its buffers.

pub use ext4::Ext4Walker;

mod ext4;

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum DiffError {
    #[snafu(display("failed to read rootfs image: {}", source))]
    Io {
        source: std::io::Error,
    },
    #[snafu(display("{} is not an ext4 filesystem", path))]
    NotExt4 {
        path: String,
    },
    #[snafu(display("unsupported ext4 feature: {}", feature))]
    Unsupported {
        feature: String,
    },
    #[snafu(display("corrupt filesystem structure: {}", what))]
    Corrupt {
        what: String,
    },
}

pub type Result<T, E = DiffError> = std::result::Result<T, E>;

/// File kind as recorded in the baseline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

/// One row of the rootfs file table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineEntry {
    /// Absolute in-guest path.
    pub path: String,
    pub kind: FileKind,
    pub size: u64,
    /// Seconds since the epoch.
    pub mtime: i64,
}

/// Change classification for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub path: String,
    pub kind: ChangeKind,
}

/// Compare a fresh enumeration against the baseline. A path is modified
/// iff its size or mtime changed; output is sorted ascending by path.
pub fn compare(
    baseline: &[BaselineEntry],
    current: &[BaselineEntry],
) -> Vec<DiffEntry> {
    let before: BTreeMap<&str, &BaselineEntry> =
        baseline.iter().map(|e| (e.path.as_str(), e)).collect();
    let after: BTreeMap<&str, &BaselineEntry> =
        current.iter().map(|e| (e.path.as_str(), e)).collect();

    let mut changes = Vec::new();
    for (path, entry) in &after {
        match before.get(path) {
            None => changes.push(DiffEntry {
                path: (*path).to_string(),
                kind: ChangeKind::Added,
            }),
            Some(old) => {
                if old.size != entry.size || old.mtime != entry.mtime {
                    changes.push(DiffEntry {
                        path: (*path).to_string(),
                        kind: ChangeKind::Modified,
                    });
                }
            }
        }
    }
    for path in before.keys() {
        if !after.contains_key(path) {
            changes.push(DiffEntry {
                path: (*path).to_string(),
                kind: ChangeKind::Deleted,
            });
        }
    }
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

/// Enumerates the file table of a rootfs disk image. Seam so tests can
/// substitute a synthetic filesystem view.
pub trait RootfsInspector: Send + Sync {
    fn enumerate(&self, image: &Path) -> Result<Vec<BaselineEntry>>;
}

/// Production inspector: walks the ext4 image directly.
#[derive(Debug, Default)]
pub struct Ext4Inspector;

impl RootfsInspector for Ext4Inspector {
    fn enumerate(&self, image: &Path) -> Result<Vec<BaselineEntry>> {
        let mut walker = Ext4Walker::open(image)?;
        walker.walk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64, mtime: i64) -> BaselineEntry {
        BaselineEntry {
            path: path.to_string(),
            kind: FileKind::Regular,
            size,
            mtime,
        }
    }

    #[test]
    fn identical_tables_diff_empty() {
        let table = vec![entry("/a", 1, 10), entry("/b", 2, 20)];
        assert!(compare(&table, &table).is_empty());
    }

    #[test]
    fn size_or_mtime_change_is_modified() {
        let before = vec![entry("/a", 1, 10), entry("/b", 2, 20)];
        let after = vec![entry("/a", 5, 10), entry("/b", 2, 21)];
        let changes = compare(&before, &after);
        assert_eq!(changes.len(), 2);
        assert!(changes
            .iter()
            .all(|c| c.kind == ChangeKind::Modified));
    }

    #[test]
    fn added_and_deleted_sorted_by_path() {
        let before = vec![entry("/gone", 1, 1)];
        let after = vec![entry("/z", 1, 1), entry("/a", 1, 1)];
        let changes = compare(&before, &after);
        assert_eq!(
            changes,
            vec![
                DiffEntry {
                    path: "/a".into(),
                    kind: ChangeKind::Added
                },
                DiffEntry {
                    path: "/gone".into(),
                    kind: ChangeKind::Deleted
                },
                DiffEntry {
                    path: "/z".into(),
                    kind: ChangeKind::Added
                },
            ]
        );
    }
}
