//! The node endpoint: one route that describes directories, describes
//! files, or streams file bytes, negotiated on the `Accept` header.
//!
//! `Accept: application/json` yields JSON: a listing when the node is a
//! directory, node metadata when it is a file. Any other `Accept` streams
//! the raw bytes with the sniffed media type. Directories always answer
//! with a listing.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::storage::locator::Locator;
use crate::storage::{FileNode, NodeKind, Storage, extension_of};

use super::AppState;
use super::error::ApiError;
use super::payload::{Node, NodeList};

#[derive(Debug, Default, Deserialize)]
pub struct NodeQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    filter: Option<String>,
    search: Option<String>,
    download: Option<String>,
    fields: Option<String>,
    snapshot: Option<String>,
}

pub async fn at_root(
    State(state): State<AppState>,
    Path(storage): Path<String>,
    Query(query): Query<NodeQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve_node(state, storage, String::new(), query, headers).await
}

pub async fn at_path(
    State(state): State<AppState>,
    Path((storage, path)): Path<(String, String)>,
    Query(query): Query<NodeQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    serve_node(state, storage, path, query, headers).await
}

async fn serve_node(
    state: AppState,
    storage_name: String,
    raw_path: String,
    query: NodeQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let storage = state
        .registry
        .get(&storage_name)
        .ok_or_else(|| ApiError::storage_not_found(&storage_name))?;

    let locator = Locator::parse(&storage_name, &raw_path, query.snapshot.as_deref())?;

    let stater = storage
        .as_stater()
        .ok_or_else(|| ApiError::not_supported("storage does not support stat"))?;
    let meta = stater.stat(&locator).await?;

    if meta.is_dir {
        serve_listing(&state, storage.as_ref(), &locator, &query).await
    } else if accepts_json(&headers) {
        serve_metadata(storage.as_ref(), &locator, meta.mtime).await
    } else {
        serve_stream(storage.as_ref(), &locator, parse_download(&query)?).await
    }
}

async fn serve_listing(
    state: &AppState,
    storage: &dyn Storage,
    locator: &Locator,
    query: &NodeQuery,
) -> Result<Response, ApiError> {
    let lister = storage
        .as_lister()
        .ok_or_else(|| ApiError::not_supported("storage does not support listing"))?;

    let mut nodes = lister.list(locator).await?;
    sort_nodes(&mut nodes);
    let nodes = apply_filters(nodes, query)?;

    let total_size = if wants_total_size(query.fields.as_deref()) {
        match lister.total_size(locator).await {
            Ok(size) => Some(size),
            Err(err) => {
                warn!(locator = %locator, error = %err, "total size walk failed");
                None
            }
        }
    } else {
        None
    };

    let listing = NodeList {
        dirname: locator.to_string(),
        read_only: true,
        storages: state.registry.names(),
        files: nodes.into_iter().map(Node::from).collect(),
        total_size,
    };
    Ok(Json(listing).into_response())
}

async fn serve_metadata(
    storage: &dyn Storage,
    locator: &Locator,
    mtime: i64,
) -> Result<Response, ApiError> {
    let reader = storage
        .as_reader()
        .ok_or_else(|| ApiError::not_supported("storage does not support reading"))?;
    let content = reader.read_stream(locator).await?;

    let basename = basename_of(locator.relpath());
    let node = Node {
        path: locator.relpath().to_string(),
        kind: NodeKind::File,
        extension: extension_of(basename),
        basename: basename.to_string(),
        file_size: content.size,
        last_modified: mtime,
        mime_type: Some(content.media_type),
    };
    Ok(Json(node).into_response())
}

async fn serve_stream(
    storage: &dyn Storage,
    locator: &Locator,
    download: bool,
) -> Result<Response, ApiError> {
    let reader = storage
        .as_reader()
        .ok_or_else(|| ApiError::not_supported("storage does not support reading"))?;
    let content = reader.read_stream(locator).await?;

    let stream = ReaderStream::new(tokio::fs::File::from_std(content.file));
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content.media_type)
        .header(header::CONTENT_LENGTH, content.size);
    if download {
        let filename = basename_of(locator.relpath()).replace('"', "\\\"");
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        );
    }
    builder
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError::internal(err.to_string()))
}

fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

fn parse_download(query: &NodeQuery) -> Result<bool, ApiError> {
    match query.download.as_deref() {
        None | Some("") | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(ApiError::invalid_parameter(format!(
            "download must be true or false, got {other:?}"
        ))),
    }
}

fn wants_total_size(fields: Option<&str>) -> bool {
    fields.is_some_and(|fields| fields.contains("(total_size)"))
}

/// Directories first, then basename ascending; stable within groups.
fn sort_nodes(nodes: &mut [FileNode]) {
    nodes.sort_by(|a, b| {
        (a.kind != NodeKind::Dir)
            .cmp(&(b.kind != NodeKind::Dir))
            .then_with(|| a.basename.cmp(&b.basename))
    });
}

/// Filters run after the sort and never reorder.
fn apply_filters(nodes: Vec<FileNode>, query: &NodeQuery) -> Result<Vec<FileNode>, ApiError> {
    let mut nodes = nodes;

    if let Some(kind) = query.kind.as_deref() {
        if kind != "file" && kind != "dir" {
            return Err(ApiError::invalid_parameter(format!(
                "type must be file or dir, got {kind:?}"
            )));
        }
        nodes.retain(|node| node.kind.as_str() == kind);
    }

    if let Some(pattern) = query.filter.as_deref() {
        // Asterisks are stripped; full glob matching is a future extension.
        let needle = pattern.replace('*', "");
        if !needle.is_empty() {
            nodes.retain(|node| node.basename.contains(&needle));
        }
    }

    if let Some(search) = query.search.as_deref() {
        if !search.is_empty() {
            let needle = search.to_lowercase();
            nodes.retain(|node| node.basename.to_lowercase().contains(&needle));
        }
    }

    Ok(nodes)
}

fn basename_of(relpath: &str) -> &str {
    relpath.rsplit('/').next().unwrap_or(relpath)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, kind: NodeKind) -> FileNode {
        FileNode {
            path: name.to_string(),
            kind,
            basename: name.to_string(),
            extension: String::new(),
            size: 0,
            last_modified: 0,
            mime_type: None,
        }
    }

    #[test]
    fn sort_puts_directories_first_then_names() {
        let mut nodes = vec![
            node("zebra.txt", NodeKind::File),
            node("alpha", NodeKind::Dir),
            node("beta.txt", NodeKind::File),
            node("zoo", NodeKind::Dir),
        ];
        sort_nodes(&mut nodes);
        let names: Vec<_> = nodes.iter().map(|n| n.basename.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zoo", "beta.txt", "zebra.txt"]);
    }

    #[test]
    fn sort_is_case_sensitive() {
        let mut nodes = vec![
            node("banana.txt", NodeKind::File),
            node("Apple.txt", NodeKind::File),
        ];
        sort_nodes(&mut nodes);
        assert_eq!(nodes[0].basename, "Apple.txt");
    }

    #[test]
    fn type_filter_keeps_matching_kind() {
        let nodes = vec![node("d", NodeKind::Dir), node("f", NodeKind::File)];
        let query = NodeQuery {
            kind: Some("dir".into()),
            ..Default::default()
        };
        let kept = apply_filters(nodes, &query).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].basename, "d");

        let query = NodeQuery {
            kind: Some("bogus".into()),
            ..Default::default()
        };
        assert!(apply_filters(vec![], &query).is_err());
    }

    #[test]
    fn filter_strips_asterisks_and_substring_matches() {
        let nodes = vec![
            node("report.pdf", NodeKind::File),
            node("notes.txt", NodeKind::File),
        ];
        let query = NodeQuery {
            filter: Some("*port*".into()),
            ..Default::default()
        };
        let kept = apply_filters(nodes, &query).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].basename, "report.pdf");
    }

    #[test]
    fn search_is_case_insensitive() {
        let nodes = vec![
            node("README.md", NodeKind::File),
            node("notes.txt", NodeKind::File),
        ];
        let query = NodeQuery {
            search: Some("readme".into()),
            ..Default::default()
        };
        let kept = apply_filters(nodes, &query).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].basename, "README.md");
    }

    #[test]
    fn download_flag_parsing() {
        let query = NodeQuery {
            download: Some("true".into()),
            ..Default::default()
        };
        assert!(parse_download(&query).unwrap());
        assert!(!parse_download(&NodeQuery::default()).unwrap());
        let query = NodeQuery {
            download: Some("yes".into()),
            ..Default::default()
        };
        assert!(parse_download(&query).is_err());
    }

    #[test]
    fn basename_helper() {
        assert_eq!(basename_of("docs/note.txt"), "note.txt");
        assert_eq!(basename_of("note.txt"), "note.txt");
    }
}
