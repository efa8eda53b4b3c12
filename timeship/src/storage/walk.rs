//! Recursive size aggregation for a directory subtree.
//!
//! The walk fans out one blocking task per immediate subdirectory of the
//! starting directory and sums regular-file sizes; symbolic links are never
//! followed (the gateway stats with `AT_SYMLINK_NOFOLLOW` and a link is not
//! a regular file). The walk is fail-soft: an unreadable directory is
//! logged and contributes nothing instead of aborting the sum. Dropping the
//! returned future (client gone) cancels the walk at the next entry
//! boundary via the token's drop guard.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::errors::{Result, StorageError};
use super::rooted::RootDir;

pub async fn total_size(dir: Arc<RootDir>, path: String) -> Result<u64> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let entries = {
        let dir = Arc::clone(&dir);
        let path = path.clone();
        tokio::task::spawn_blocking(move || dir.read_dir(&path))
            .await
            .map_err(|err| StorageError::Io(std::io::Error::other(err)))??
    };

    let mut sum = 0u64;
    let mut subtrees = Vec::new();
    for entry in entries {
        if entry.meta.is_dir {
            let dir = Arc::clone(&dir);
            let child = join_path(&path, &entry.name);
            let cancel = cancel.clone();
            subtrees.push(tokio::task::spawn_blocking(move || {
                walk_dir(&dir, &child, &cancel)
            }));
        } else if entry.meta.is_file {
            sum += entry.meta.size;
        }
    }

    for result in join_all(subtrees).await {
        match result {
            Ok(subtotal) => sum += subtotal,
            Err(err) => warn!(error = %err, "size walk task failed"),
        }
    }
    Ok(sum)
}

fn walk_dir(dir: &RootDir, path: &str, cancel: &CancellationToken) -> u64 {
    if cancel.is_cancelled() {
        return 0;
    }
    let entries = match dir.read_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path, error = %err, "skipping unreadable directory in size walk");
            return 0;
        }
    };

    let mut sum = 0u64;
    for entry in entries {
        if cancel.is_cancelled() {
            return sum;
        }
        if entry.meta.is_dir {
            sum += walk_dir(dir, &join_path(path, &entry.name), cancel);
        } else if entry.meta.is_file {
            sum += entry.meta.size;
        }
    }
    sum
}

fn join_path(dir: &str, name: &str) -> String {
    if dir == "." {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
