//! Snapshot enumeration endpoints. The UI fans out one snapshot-scoped
//! node request per returned descriptor, so this endpoint only enumerates;
//! it never opens the snapshots themselves.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::debug;

use crate::storage::locator::Locator;

use super::AppState;
use super::error::ApiError;
use super::payload::{Snapshot, SnapshotList};

const DEFAULT_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    limit: Option<String>,
    offset: Option<String>,
}

pub async fn at_root(
    State(state): State<AppState>,
    Path(storage): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Response, ApiError> {
    serve_snapshots(state, storage, String::new(), query).await
}

pub async fn at_path(
    State(state): State<AppState>,
    Path((storage, path)): Path<(String, String)>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Response, ApiError> {
    serve_snapshots(state, storage, path, query).await
}

async fn serve_snapshots(
    state: AppState,
    storage_name: String,
    raw_path: String,
    query: SnapshotQuery,
) -> Result<Response, ApiError> {
    let storage = state
        .registry
        .get(&storage_name)
        .ok_or_else(|| ApiError::storage_not_found(&storage_name))?;

    let locator = Locator::parse(&storage_name, &raw_path, None)?;

    let lister = storage
        .as_snapshot_lister()
        .ok_or_else(|| ApiError::not_supported("storage does not support snapshots"))?;

    let limit = parse_count(query.limit.as_deref(), "limit", DEFAULT_LIMIT)?;
    let offset = parse_count(query.offset.as_deref(), "offset", 0)?;

    let snapshots = lister.snapshots(&locator).await?;
    debug!(locator = %locator, count = snapshots.len(), "enumerated snapshots");

    let page: Vec<Snapshot> = snapshots
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(Snapshot::from)
        .collect();

    Ok(Json(SnapshotList {
        storage: locator.storage().to_string(),
        path: locator.relpath().to_string(),
        snapshots: page,
    })
    .into_response())
}

fn parse_count(raw: Option<&str>, name: &str, default: usize) -> Result<usize, ApiError> {
    match raw {
        None | Some("") => Ok(default),
        Some(value) => value.parse().map_err(|_| {
            ApiError::invalid_parameter(format!("{name} must be a non-negative integer"))
        }),
    }
}
