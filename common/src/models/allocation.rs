// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::AllocState;

/// §3 Allocation: the only row type that moves money from a pledge to a
/// beneficiary. `verified_total_at_time_of_commit` is informational only —
/// it is never read back into a balance computation, the way the teacher's
/// `sender_allocation.rs` keeps `rav_response` bytes around for audit
/// without feeding them back into the fee calculation.
#[derive(Clone, Debug, PartialEq, FromRow, Deserialize, Serialize)]
pub struct Allocation {
    pub alloc_id: String,
    pub cms_id: String,
    pub pledge_id: String,
    pub verified_total_at_time_of_commit: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
    pub status: AllocState,
    pub hostel_intimation_message_id: Option<String>,
    pub hostel_intimation_date: Option<DateTime<Utc>>,
    pub donor_alloc_message_id: Option<String>,
    pub donor_alloc_date: Option<DateTime<Utc>>,
    pub hostel_reply_message_id: Option<String>,
    pub hostel_reply_date: Option<DateTime<Utc>>,
    pub donor_notify_message_id: Option<String>,
    pub donor_notify_date: Option<DateTime<Utc>>,
    pub batch_id: Option<String>,
    pub installment_id: Option<String>,
}

impl Allocation {
    /// §3 invariant: `amount > 0`.
    pub fn is_valid_amount(&self) -> bool {
        self.amount > 0
    }
}
