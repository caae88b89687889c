use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::*;
use crate::pool::WorkerPool;

pub fn create_router(pool: WorkerPool, max_upload_bytes: usize) -> Router {
    let state = AppState { pool };

    Router::new()
        .route("/bfs/query", post(run_script))
        .route("/bfs/token", post(get_token))
        .route("/bfs/uploadticket", post(get_upload_ticket))
        .route(
            "/bfs/writebytes/{ticket}",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/bfs/readbytes", post(download_file))
        .route("/bfs/direct/{layer}/{database}/{*path}", get(direct_access))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
}
