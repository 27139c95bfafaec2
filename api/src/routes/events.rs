// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use pledger_common::models::reporting::EventRow;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::ApiState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

#[derive(Deserialize)]
pub struct EventsQuery {
    limit: Option<i64>,
}

pub async fn events(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<Vec<EventRow>>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let rows = state.store.reporting_events(limit).await?;
    Ok(Json(rows))
}
