//! The storages index.

use axum::extract::State;
use axum::response::Json;

use super::AppState;
use super::payload::StoragesList;

pub async fn list(State(state): State<AppState>) -> Json<StoragesList> {
    Json(StoragesList {
        storages: state.registry.names(),
    })
}
