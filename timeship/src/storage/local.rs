//! Local filesystem storage: the live tree behind a rooted gateway, with
//! snapshot access multiplexed through the ZFS engine. Whether a request
//! refers to the live tree or a point-in-time copy is decided here once,
//! by resolving the locator to a gateway; everything downstream (listing,
//! streaming, stat) is agnostic of which one it got.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::errors::{Result, StorageError};
use super::locator::Locator;
use super::rooted::{NodeMeta, RootDir};
use super::walk;
use super::zfs::ZfsEngine;
use super::{
    FileContent, FileNode, Lister, NodeKind, Reader, SnapshotInfo, SnapshotLister, Stater, Storage,
    extension_of, sniff,
};

#[derive(Clone)]
pub struct LocalStorage {
    root: Arc<RootDir>,
    zfs: ZfsEngine,
}

/// The gateway a request resolved to. A snapshot gateway is created per
/// request and its descriptor closes when the request's call returns.
enum Gateway {
    Live(Arc<RootDir>),
    Snapshot(RootDir),
}

impl Gateway {
    fn dir(&self) -> &RootDir {
        match self {
            Gateway::Live(root) => root,
            Gateway::Snapshot(root) => root,
        }
    }

    fn into_shared(self) -> Arc<RootDir> {
        match self {
            Gateway::Live(root) => root,
            Gateway::Snapshot(root) => Arc::new(root),
        }
    }
}

impl LocalStorage {
    pub fn open(root_path: &Path) -> std::io::Result<Self> {
        let root = Arc::new(RootDir::open(root_path)?);
        let zfs = ZfsEngine::new(Arc::clone(&root));
        Ok(Self { root, zfs })
    }

    /// Resolve a locator to the gateway it addresses and the gateway-local
    /// path of the node (`.` for the gateway root).
    fn resolve(&self, locator: &Locator) -> Result<(Gateway, String)> {
        match locator.snapshot() {
            None => Ok((
                Gateway::Live(Arc::clone(&self.root)),
                locator.fs_path().to_string(),
            )),
            Some(id) => {
                let (gateway, subpath) = self.zfs.snapshot_gateway(locator.relpath(), id)?;
                let fs_path = if subpath.is_empty() {
                    ".".to_string()
                } else {
                    subpath
                };
                Ok((Gateway::Snapshot(gateway), fs_path))
            }
        }
    }

    fn list_blocking(&self, locator: &Locator) -> Result<Vec<FileNode>> {
        let (gateway, fs_path) = self.resolve(locator)?;
        let dir = gateway.dir();
        let entries = dir.read_dir(&fs_path)?;

        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            let child = locator.child(&entry.name);
            let node = if entry.meta.is_dir {
                FileNode {
                    path: child.relpath().to_string(),
                    kind: NodeKind::Dir,
                    basename: entry.name,
                    extension: String::new(),
                    size: 0,
                    last_modified: entry.meta.mtime,
                    mime_type: None,
                }
            } else {
                let entry_path = join_gateway_path(&fs_path, &entry.name);
                FileNode {
                    path: child.relpath().to_string(),
                    kind: NodeKind::File,
                    extension: extension_of(&entry.name),
                    size: entry.meta.size,
                    last_modified: entry.meta.mtime,
                    mime_type: sniff_entry(dir, &entry_path),
                    basename: entry.name,
                }
            };
            nodes.push(node);
        }
        debug!(locator = %locator, count = nodes.len(), "listed directory");
        Ok(nodes)
    }

    fn read_stream_blocking(&self, locator: &Locator) -> Result<FileContent> {
        let (gateway, fs_path) = self.resolve(locator)?;
        let mut file = gateway.dir().open_file(&fs_path)?;
        let meta = file.metadata()?;
        if meta.is_dir() {
            return Err(StorageError::NotFound(locator.to_string()));
        }
        let size = meta.len();

        let mut head = [0u8; sniff::SNIFF_LEN];
        let mut filled = 0;
        while filled < head.len() {
            let n = file.read(&mut head[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let media_type = sniff::detect(&head[..filled]).to_string();
        file.seek(SeekFrom::Start(0))?;

        Ok(FileContent {
            file,
            size,
            media_type,
        })
    }

    fn stat_blocking(&self, locator: &Locator) -> Result<NodeMeta> {
        let (gateway, fs_path) = self.resolve(locator)?;
        gateway.dir().stat(&fs_path)
    }
}

/// Run a blocking storage operation on the blocking pool.
async fn run_blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| StorageError::Io(std::io::Error::other(err)))?
}

impl Storage for LocalStorage {
    fn as_lister(&self) -> Option<&dyn Lister> {
        Some(self)
    }

    fn as_reader(&self) -> Option<&dyn Reader> {
        Some(self)
    }

    fn as_stater(&self) -> Option<&dyn Stater> {
        Some(self)
    }

    fn as_snapshot_lister(&self) -> Option<&dyn SnapshotLister> {
        Some(self)
    }
}

#[async_trait]
impl Lister for LocalStorage {
    async fn list(&self, locator: &Locator) -> Result<Vec<FileNode>> {
        let this = self.clone();
        let locator = locator.clone();
        run_blocking(move || this.list_blocking(&locator)).await
    }

    async fn total_size(&self, locator: &Locator) -> Result<u64> {
        let this = self.clone();
        let resolve_locator = locator.clone();
        let (gateway, fs_path) =
            run_blocking(move || this.resolve(&resolve_locator)).await?;
        walk::total_size(gateway.into_shared(), fs_path).await
    }
}

#[async_trait]
impl Reader for LocalStorage {
    async fn read_stream(&self, locator: &Locator) -> Result<FileContent> {
        let this = self.clone();
        let locator = locator.clone();
        run_blocking(move || this.read_stream_blocking(&locator)).await
    }
}

#[async_trait]
impl Stater for LocalStorage {
    async fn stat(&self, locator: &Locator) -> Result<NodeMeta> {
        let this = self.clone();
        let locator = locator.clone();
        run_blocking(move || this.stat_blocking(&locator)).await
    }
}

#[async_trait]
impl SnapshotLister for LocalStorage {
    async fn snapshots(&self, locator: &Locator) -> Result<Vec<SnapshotInfo>> {
        let this = self.clone();
        let locator = locator.clone();
        run_blocking(move || this.zfs.snapshots(locator.relpath())).await
    }
}

fn join_gateway_path(dir: &str, name: &str) -> String {
    if dir == "." {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Sniff a listing entry's media type; any failure (unreadable entry,
/// refused symlink) leaves the field unset rather than failing the listing.
fn sniff_entry(dir: &RootDir, path: &str) -> Option<String> {
    let mut file = dir.open_file(path).ok()?;
    let mut head = [0u8; sniff::SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
    }
    Some(sniff::detect(&head[..filled]).to_string())
}
