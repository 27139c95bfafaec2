// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use pledger_common::models::reporting::Summary;

use crate::error::ApiError;
use crate::state::ApiState;

pub async fn summary(State(state): State<Arc<ApiState>>) -> Result<Json<Summary>, ApiError> {
    let summary = state.store.reporting_summary().await?;
    Ok(Json(summary))
}
