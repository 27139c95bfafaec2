// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use pledger_common::error::Error;
use pledger_common::models::reporting::PledgeTrack;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Deserialize)]
pub struct TrackQuery {
    #[serde(rename = "pledgeId")]
    pledge_id: String,
}

pub async fn track(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<TrackQuery>,
) -> Result<Json<PledgeTrack>, ApiError> {
    let track = state
        .store
        .reporting_track(&q.pledge_id)
        .await?
        .ok_or_else(|| Error::NotFound(q.pledge_id.clone()))?;
    Ok(Json(track))
}
