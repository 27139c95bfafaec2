// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use pledger_common::models::reporting::ChapterBreakdown;

use crate::error::ApiError;
use crate::state::ApiState;

pub async fn chapters(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<ChapterBreakdown>>, ApiError> {
    let rows = state.store.reporting_chapters().await?;
    Ok(Json(rows))
}
