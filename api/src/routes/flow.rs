// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use pledger_common::models::reporting::FlowPoint;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::ApiState;

const DEFAULT_DAYS: i32 = 30;
const MAX_DAYS: i32 = 365;

#[derive(Deserialize)]
pub struct FlowQuery {
    days: Option<i32>,
}

pub async fn flow(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<FlowQuery>,
) -> Result<Json<Vec<FlowPoint>>, ApiError> {
    let days = q.days.unwrap_or(DEFAULT_DAYS).clamp(1, MAX_DAYS);
    let points = state.store.reporting_flow(days).await?;
    Ok(Json(points))
}
