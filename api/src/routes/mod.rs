// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

mod chapters;
mod composition;
mod events;
mod flow;
mod summary;
mod track;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::auth::require_api_key;
use crate::state::ApiState;

/// The six §4.12/§6 endpoints, all behind the same api-key gate. Mirrors the
/// teacher's one-`Router`-per-surface shape (`app_router`/`lexe_router` in
/// the broader example pack) generalized to a single flat surface since the
/// Sanitized Read API has only one caller class (the dashboard).
pub fn router(state: Arc<ApiState>) -> Router<()> {
    Router::new()
        .route("/summary", get(summary::summary))
        .route("/flow", get(flow::flow))
        .route("/chapters", get(chapters::chapters))
        .route("/composition", get(composition::composition))
        .route("/events", get(events::events))
        .route("/track", get(track::track))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}
