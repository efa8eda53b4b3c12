//! Wire shapes for the API responses.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::storage::{FileNode, NodeKind, SnapshotInfo};

#[derive(Debug, Serialize)]
pub struct Node {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub basename: String,
    pub extension: String,
    pub file_size: u64,
    pub last_modified: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl From<FileNode> for Node {
    fn from(node: FileNode) -> Self {
        Self {
            path: node.path,
            kind: node.kind,
            basename: node.basename,
            extension: node.extension,
            file_size: node.size,
            last_modified: node.last_modified,
            mime_type: node.mime_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NodeList {
    pub dirname: String,
    pub read_only: bool,
    pub storages: Vec<String>,
    pub files: Vec<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl From<SnapshotInfo> for Snapshot {
    fn from(info: SnapshotInfo) -> Self {
        Self {
            id: info.id,
            kind: info.kind,
            timestamp: info.timestamp,
            name: info.name,
            // A negative size means unknown and stays off the wire.
            size: (info.size >= 0).then_some(info.size),
            metadata: (!info.metadata.is_empty()).then_some(info.metadata),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SnapshotList {
    pub storage: String,
    pub path: String,
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Serialize)]
pub struct StoragesList {
    pub storages: Vec<String>,
}
