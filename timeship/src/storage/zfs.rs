//! ZFS sidecar snapshot discovery and resolution.
//!
//! ZFS filesystems expose their snapshots as a hidden `.zfs/snapshot`
//! directory at the filesystem's mount root; `<root>/.zfs/snapshot/<name>`
//! is the whole tree as of `<name>`. Discovery walks from a node's path
//! upward toward the storage root (never above it) looking for the nearest
//! such sidecar; everything runs through the storage's rooted gateway, so a
//! hostile path cannot aim discovery outside the root.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::debug;

use super::SnapshotInfo;
use super::errors::{Result, StorageError};
use super::locator::SnapshotId;
use super::rooted::RootDir;

const SNAPSHOT_KIND: &str = "zfs";
const SIDECAR: &str = ".zfs/snapshot";

/// How to extract and parse a timestamp from a snapshot name: a regex with
/// one capture group and a chrono format string for the captured text.
#[derive(Debug, Clone)]
pub struct DateTimePattern {
    regex: Regex,
    layout: String,
}

impl DateTimePattern {
    pub fn new(regex: &str, layout: impl Into<String>) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(regex)?,
            layout: layout.into(),
        })
    }

    fn parse(&self, name: &str) -> Option<i64> {
        let captured = self.regex.captures(name)?.get(1)?.as_str();
        if self.layout.contains("%H") {
            let dt = NaiveDateTime::parse_from_str(captured, &self.layout).ok()?;
            Some(dt.and_utc().timestamp())
        } else {
            let date = NaiveDate::parse_from_str(captured, &self.layout).ok()?;
            Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
        }
    }
}

/// The default patterns, most specific first so that a seconds-bearing name
/// is not truncated to the minute by a broader rule. Matched as substrings
/// anywhere in the snapshot name.
pub fn default_patterns() -> Vec<DateTimePattern> {
    [
        (r"(\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2})", "%Y-%m-%d_%H-%M-%S"),
        (r"(\d{8}_\d{6})", "%Y%m%d_%H%M%S"),
        (r"(\d{4}-\d{2}-\d{2}_\d{2}-\d{2})", "%Y-%m-%d_%H-%M"),
        (r"(\d{4}-\d{2}-\d{2})", "%Y-%m-%d"),
    ]
    .into_iter()
    .map(|(regex, layout)| {
        DateTimePattern::new(regex, layout).expect("default snapshot pattern is valid")
    })
    .collect()
}

/// Snapshot engine for one storage root.
#[derive(Clone)]
pub struct ZfsEngine {
    root: Arc<RootDir>,
    patterns: Arc<[DateTimePattern]>,
}

impl ZfsEngine {
    pub fn new(root: Arc<RootDir>) -> Self {
        Self::with_patterns(root, default_patterns())
    }

    pub fn with_patterns(root: Arc<RootDir>, patterns: Vec<DateTimePattern>) -> Self {
        let patterns = if patterns.is_empty() {
            default_patterns()
        } else {
            patterns
        };
        Self {
            root,
            patterns: patterns.into(),
        }
    }

    /// First pattern match wins; `None` when nothing matched.
    fn parse_timestamp(&self, name: &str) -> Option<i64> {
        self.patterns.iter().find_map(|pattern| pattern.parse(name))
    }

    /// Find the nearest snapshot-bearing ancestor of `relpath` (normalized,
    /// empty for the root). Returns the root-relative sidecar path, e.g.
    /// `docs/.zfs/snapshot`, or `None` when no ancestor up to and including
    /// the root hosts one.
    fn find_sidecar(&self, relpath: &str) -> Option<String> {
        let mut ancestor = relpath;
        loop {
            let candidate = if ancestor.is_empty() {
                SIDECAR.to_string()
            } else {
                format!("{ancestor}/{SIDECAR}")
            };
            if let Ok(meta) = self.root.stat(&candidate) {
                if meta.is_dir {
                    return Some(candidate);
                }
            }
            if ancestor.is_empty() {
                return None;
            }
            ancestor = match ancestor.rfind('/') {
                Some(idx) => &ancestor[..idx],
                None => "",
            };
        }
    }

    /// Enumerate the snapshots visible at `relpath`, newest first. A path
    /// with no snapshot-bearing ancestor yields an empty list, not an error.
    pub fn snapshots(&self, relpath: &str) -> Result<Vec<SnapshotInfo>> {
        let Some(sidecar) = self.find_sidecar(relpath) else {
            debug!(path = relpath, "no snapshot sidecar");
            return Ok(Vec::new());
        };

        let entries = self.root.read_dir(&sidecar)?;
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.meta.is_dir {
                continue;
            }
            // Fall back to the snapshot directory's own mtime when the name
            // carries no parseable timestamp.
            let timestamp = self
                .parse_timestamp(&entry.name)
                .unwrap_or(entry.meta.mtime);
            let mut metadata = BTreeMap::new();
            metadata.insert("zfs_root".to_string(), sidecar.clone());
            snapshots.push(SnapshotInfo {
                id: format!("{SNAPSHOT_KIND}:{}", entry.name),
                kind: SNAPSHOT_KIND.to_string(),
                timestamp,
                name: entry.name,
                size: -1,
                metadata,
            });
        }

        // Stable: equal timestamps keep discovery order.
        snapshots.sort_by_key(|snapshot| Reverse(snapshot.timestamp));
        Ok(snapshots)
    }

    /// Open a gateway rooted at the snapshot's copy of the tree and return
    /// it with the snapshot-relative remainder of `relpath` (the portion
    /// below the snapshot-bearing ancestor; empty means the snapshot root).
    pub fn snapshot_gateway(&self, relpath: &str, id: &SnapshotId) -> Result<(RootDir, String)> {
        if id.kind() != SNAPSHOT_KIND {
            return Err(StorageError::InvalidSnapshot(id.to_string()));
        }
        let name = id.name();
        if name.contains('/') || name == "." || name == ".." {
            return Err(StorageError::InvalidSnapshot(id.to_string()));
        }

        let sidecar = self
            .find_sidecar(relpath)
            .ok_or_else(|| StorageError::NotFound(relpath.to_string()))?;
        let gateway = self.root.open_beneath(&format!("{sidecar}/{name}"))?;

        let ancestor = sidecar
            .strip_suffix(SIDECAR)
            .unwrap_or("")
            .trim_end_matches('/');
        let subpath = if ancestor.is_empty() {
            relpath
        } else if relpath == ancestor {
            ""
        } else {
            relpath
                .strip_prefix(ancestor)
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or("")
        };
        Ok((gateway, subpath.to_string()))
    }
}
