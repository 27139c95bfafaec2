// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// §4.12: the shapes the Sanitized Read API hands to the UI/dashboard.
/// None of these carry `donor_email`/`donor_display_name` — every field here
/// is either an amount, a count, or an operational identifier (`cms_id`,
/// `school`) the spec explicitly allows through.

#[derive(Clone, Debug, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    pub pledge_count: i64,
    pub total_committed: i64,
    pub total_verified: i64,
    pub total_allocated: i64,
    pub total_outstanding: i64,
    pub by_status: Vec<StatusCount>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FlowPoint {
    pub day: NaiveDate,
    pub pledged_amount: i64,
    pub verified_amount: i64,
    pub allocated_amount: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChapterBreakdown {
    pub chapter: String,
    pub pledge_count: i64,
    pub committed_amount: i64,
    pub verified_amount: i64,
    pub allocated_amount: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CompositionSlice {
    pub duration_code: String,
    pub pledge_count: i64,
    pub committed_amount: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct EventRow {
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub target_id: String,
    pub action: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackAllocation {
    pub alloc_id: String,
    pub cms_id: String,
    pub school: String,
    pub amount: i64,
    pub status: String,
    pub pending_amount: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PledgeTrack {
    pub pledge_id: String,
    pub status: String,
    pub committed_amount: i64,
    pub verified_total: i64,
    pub cash_balance: i64,
    pub outstanding: i64,
    pub submitted_at: DateTime<Utc>,
    pub allocations: Vec<TrackAllocation>,
    pub timeline: Vec<EventRow>,
}
