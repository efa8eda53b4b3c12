//! HTTP surface: routes, content negotiation, and the request plumbing
//! shared by every endpoint.

pub mod cors;
pub mod error;
pub mod nodes;
pub mod payload;
pub mod snapshots;
pub mod storages;
pub mod stubs;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use axum::http::Uri;
use axum::http::uri::PathAndQuery;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::config::Settings;
use crate::storage::StorageRegistry;
use error::ApiError;

/// Per-request processing cap; the transport-level write timeout analogue.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StorageRegistry>,
    pub settings: Arc<Settings>,
}

/// Assemble the full application router, mounted under the configured API
/// prefix.
pub fn router(state: AppState) -> Router {
    let prefix = state.settings.api_prefix.clone();
    let api = api_router(state.clone());

    let app = if prefix == "/" {
        api
    } else {
        Router::new().nest(&prefix, api).fallback(not_found)
    };

    app.layer(middleware::from_fn(request_timeout))
        .layer(middleware::from_fn_with_state(state, cors::apply))
        .layer(middleware::from_fn(normalize_dot_segments))
}

fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/storages", get(storages::list))
        .route(
            "/storages/{storage}/nodes",
            get(nodes::at_root)
                .post(stubs::not_implemented)
                .delete(stubs::not_implemented)
                .patch(stubs::not_implemented),
        )
        .route(
            "/storages/{storage}/nodes/{*path}",
            get(nodes::at_path)
                .post(stubs::not_implemented)
                .delete(stubs::not_implemented)
                .patch(stubs::not_implemented),
        )
        .route("/storages/{storage}/snapshots", get(snapshots::at_root))
        .route(
            "/storages/{storage}/snapshots/{*path}",
            get(snapshots::at_path),
        )
        .route("/storages/{storage}/copies", axum::routing::post(stubs::not_implemented))
        .route("/storages/{storage}/moves", axum::routing::post(stubs::not_implemented))
        .route(
            "/storages/{storage}/archives",
            get(stubs::not_implemented).post(stubs::not_implemented),
        )
        .route(
            "/storages/{storage}/archives/{*path}",
            get(stubs::not_implemented).post(stubs::not_implemented),
        )
        .fallback(not_found)
        .with_state(state)
}

/// Fallback for anything that matches no route. The detail deliberately
/// does not echo the requested path.
async fn not_found() -> ApiError {
    ApiError::not_found("no such resource")
}

async fn request_timeout(request: Request, next: Next) -> Response {
    match tokio::time::timeout(REQUEST_TIMEOUT, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::internal("request processing timed out").into_response(),
    }
}

/// Clean the raw URL path before routing: `.` and `..` segments are
/// removed and trailing slashes dropped, so `nodes/../x` never reaches a
/// handler (it rewrites to a path that matches no route) and `nodes/`,
/// `nodes/.` and `nodes` are the same route. The storage layer still
/// refuses any `..` that arrives by another avenue.
async fn normalize_dot_segments(mut request: Request, next: Next) -> Response {
    let uri = request.uri();
    let path = uri.path();
    let needs_rewrite = path
        .split('/')
        .any(|segment| segment == "." || segment == "..")
        || (path.len() > 1 && path.ends_with('/'));
    if needs_rewrite {
        if let Some(rewritten) = rewrite_uri(uri) {
            *request.uri_mut() = rewritten;
        }
    }
    next.run(request).await
}

fn rewrite_uri(uri: &Uri) -> Option<Uri> {
    let cleaned = remove_dot_segments(uri.path());
    let path_and_query = match uri.query() {
        Some(query) => format!("{cleaned}?{query}"),
        None => cleaned,
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse::<PathAndQuery>().ok()?);
    Uri::from_parts(parts).ok()
}

fn remove_dot_segments(path: &str) -> String {
    let mut output: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                if output.last().is_some_and(|last| !last.is_empty()) {
                    output.pop();
                }
            }
            other => output.push(other),
        }
    }
    while output.last().is_some_and(|last| last.is_empty()) && output.len() > 1 {
        output.pop();
    }
    let joined = output.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_segment_removal() {
        assert_eq!(remove_dot_segments("/a/b/../c"), "/a/c");
        assert_eq!(remove_dot_segments("/a/./b"), "/a/b");
        assert_eq!(remove_dot_segments("/../x"), "/x");
        assert_eq!(remove_dot_segments("/a/.."), "/");
        assert_eq!(
            remove_dot_segments("/api/storages/local/nodes/../outside.txt"),
            "/api/storages/local/outside.txt"
        );
        assert_eq!(remove_dot_segments("/plain/path"), "/plain/path");
    }

    #[test]
    fn trailing_slashes_and_lone_dots_collapse() {
        assert_eq!(remove_dot_segments("/nodes/"), "/nodes");
        assert_eq!(remove_dot_segments("/nodes/."), "/nodes");
        assert_eq!(remove_dot_segments("/"), "/");
    }
}
