//! Storage layer: named roots, capability traits, and the types that flow
//! between the filesystem and the HTTP surface.
//!
//! A storage advertises the capabilities it supports by returning `Some`
//! from the corresponding accessor on [`Storage`]; the HTTP layer probes
//! the set at call time. This replaces an inheritance chain with tagged
//! composition: a storage type that can list but not stream simply leaves
//! `as_reader` at its default.

pub mod errors;
pub mod local;
pub mod locator;
pub mod rooted;
pub mod sniff;
pub mod walk;
pub mod zfs;

use std::collections::BTreeMap;
use std::fs::File;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use errors::Result;
use locator::Locator;
use rooted::NodeMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dir,
    File,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Dir => "dir",
            NodeKind::File => "file",
        }
    }
}

/// One enriched directory entry, built on demand from an OS stat and never
/// cached beyond a single response.
#[derive(Debug, Clone)]
pub struct FileNode {
    /// Path relative to the storage root.
    pub path: String,
    pub kind: NodeKind,
    pub basename: String,
    /// Characters after the final `.` of the basename; empty when none and
    /// for directories.
    pub extension: String,
    /// Bytes; 0 for directories.
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: i64,
    pub mime_type: Option<String>,
}

/// One snapshot visible at some path, derived from the sidecar directory on
/// each request.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// `"<kind>:<name>"`, unique within its storage.
    pub id: String,
    pub kind: String,
    pub timestamp: i64,
    pub name: String,
    /// −1 when unknown.
    pub size: i64,
    pub metadata: BTreeMap<String, String>,
}

/// An open byte source plus the facts the HTTP layer needs to frame it.
pub struct FileContent {
    pub file: File,
    pub size: u64,
    pub media_type: String,
}

#[async_trait]
pub trait Lister: Send + Sync {
    /// Enriched direct children of a directory, unordered.
    async fn list(&self, locator: &Locator) -> Result<Vec<FileNode>>;

    /// Sum of regular-file sizes under the subtree, symlinks not followed.
    async fn total_size(&self, locator: &Locator) -> Result<u64>;
}

#[async_trait]
pub trait Reader: Send + Sync {
    async fn read_stream(&self, locator: &Locator) -> Result<FileContent>;
}

#[async_trait]
pub trait Stater: Send + Sync {
    async fn stat(&self, locator: &Locator) -> Result<NodeMeta>;
}

#[async_trait]
pub trait SnapshotLister: Send + Sync {
    /// Snapshots visible at the locator's path, newest first.
    async fn snapshots(&self, locator: &Locator) -> Result<Vec<SnapshotInfo>>;
}

/// A named storage registration. Accessors default to `None`; an
/// implementation overrides the ones it supports.
pub trait Storage: Send + Sync {
    fn as_lister(&self) -> Option<&dyn Lister> {
        None
    }

    fn as_reader(&self) -> Option<&dyn Reader> {
        None
    }

    fn as_stater(&self) -> Option<&dyn Stater> {
        None
    }

    fn as_snapshot_lister(&self) -> Option<&dyn SnapshotLister> {
        None
    }
}

/// Registry of named storages. Built once at boot and shared immutably;
/// shutdown releases the storages in reverse registration order.
pub struct StorageRegistry {
    entries: Vec<(String, Arc<dyn Storage>)>,
    default_name: String,
}

impl StorageRegistry {
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            default_name: default_name.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, storage: Arc<dyn Storage>) {
        self.entries.push((name.into(), storage));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Storage>> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, storage)| storage)
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Registered storage names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.iter().map(|(name, _)| name.clone()).collect();
        names.sort();
        names
    }

    /// Release storages in reverse registration order.
    pub fn shutdown(&mut self) {
        while let Some((name, storage)) = self.entries.pop() {
            info!(storage = name, "closing storage");
            drop(storage);
        }
    }
}

/// Extension of a basename: everything after the final `.`, without the
/// dot; empty when the name has no dot.
pub(crate) fn extension_of(basename: &str) -> String {
    match basename.rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => String::new(),
    }
}
