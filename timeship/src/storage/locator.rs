use std::fmt;

use super::errors::{Result, StorageError};

/// A storage-qualified, optionally snapshot-qualified name for one node.
///
/// The wire form is `<storage>://<relpath>[?snapshot=<id>]`. The relpath is
/// always relative to the storage root: normalization strips leading and
/// duplicate slashes, drops `.` segments and rejects `..` segments outright,
/// so a locator that parsed successfully can never name anything above the
/// root. Locators are built per request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    storage: String,
    relpath: String,
    snapshot: Option<SnapshotId>,
}

impl Locator {
    pub fn parse(storage: &str, raw_path: &str, snapshot: Option<&str>) -> Result<Self> {
        let relpath = normalize(raw_path)?;
        let snapshot = match snapshot {
            Some(raw) if !raw.is_empty() => Some(SnapshotId::parse(raw)?),
            _ => None,
        };
        Ok(Self {
            storage: storage.to_string(),
            relpath,
            snapshot,
        })
    }

    pub fn storage(&self) -> &str {
        &self.storage
    }

    /// Normalized path relative to the storage root; empty names the root.
    pub fn relpath(&self) -> &str {
        &self.relpath
    }

    pub fn snapshot(&self) -> Option<&SnapshotId> {
        self.snapshot.as_ref()
    }

    /// The path handed to the filesystem gateway, which rejects the empty
    /// string: the root is addressed as `.`.
    pub fn fs_path(&self) -> &str {
        if self.relpath.is_empty() {
            "."
        } else {
            &self.relpath
        }
    }

    /// Locator for a direct child. The snapshot qualifier is dropped:
    /// children are emitted to clients by relative path alone, and the
    /// client carries the snapshot id separately.
    pub fn child(&self, basename: &str) -> Locator {
        let relpath = if self.relpath.is_empty() {
            basename.to_string()
        } else {
            format!("{}/{}", self.relpath, basename)
        };
        Locator {
            storage: self.storage.clone(),
            relpath,
            snapshot: None,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.storage, self.relpath)
    }
}

/// Normalize a raw path into a root-relative form.
///
/// Leading slashes are stripped (`/docs` and `docs` are the same node),
/// duplicate and trailing slashes collapse, and `.` segments vanish, so
/// `""`, `"/"` and `"."` all normalize to the empty root path. Any `..`
/// segment or embedded NUL is rejected before a filesystem call is made.
pub fn normalize(raw: &str) -> Result<String> {
    if raw.contains('\0') {
        return Err(StorageError::InvalidPath("embedded NUL".to_string()));
    }
    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(StorageError::InvalidPath(raw.to_string()));
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

/// An opaque snapshot identifier of the form `<kind>:<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotId {
    kind: String,
    name: String,
}

impl SnapshotId {
    pub fn parse(raw: &str) -> Result<Self> {
        let (kind, name) = raw
            .split_once(':')
            .ok_or_else(|| StorageError::InvalidSnapshot(raw.to_string()))?;
        if kind.is_empty() || name.is_empty() {
            return Err(StorageError::InvalidSnapshot(raw.to_string()));
        }
        Ok(Self {
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}
