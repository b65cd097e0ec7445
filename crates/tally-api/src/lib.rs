//! tally-api — HTTP surface of the Tally server.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/update/{kind}/{name}/{value}` | Path-encoded single update |
//! | POST | `/update/` | JSON single update, echoes the stored metric |
//! | POST | `/updates/` | JSON batch update |
//! | GET | `/value/{kind}/{name}` | Plain-text stored value |
//! | POST | `/value/` | JSON lookup |
//! | GET | `/ping` | Backend liveness |
//! | GET | `/` | HTML listing of all metrics |
//!
//! Bodies may be gzip-compressed in both directions.

pub mod gzip;
pub mod handlers;
pub mod logging;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tally_sync::Synchronizer;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub sync: Arc<Synchronizer>,
}

/// Build the complete API router.
pub fn build_router(sync: Arc<Synchronizer>) -> Router {
    let state = ApiState { sync };

    Router::new()
        .route("/", get(handlers::index))
        .route("/ping", get(handlers::ping))
        .route("/update/", post(handlers::update_json))
        .route("/updates/", post(handlers::updates_json))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_from_path))
        .route("/value/", post(handlers::value_json))
        .route("/value/{kind}/{name}", get(handlers::value_from_path))
        .layer(middleware::from_fn(gzip::gzip))
        .layer(middleware::from_fn(logging::log_requests))
        .with_state(state)
}
