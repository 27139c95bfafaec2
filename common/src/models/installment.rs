// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::InstState;

/// §3 Installment: exactly `durationMonths` rows per subscription, one per
/// calendar month of the schedule.
#[derive(Clone, Debug, PartialEq, FromRow, Deserialize, Serialize)]
pub struct Installment {
    pub installment_id: String,
    pub subscription_id: String,
    pub month_number: i32,
    pub due_date: NaiveDate,
    pub status: InstState,
    pub receipt_id: Option<String>,
    pub amount_received: i64,
    pub received_date: Option<NaiveDate>,
    pub reminder_count: i32,
    pub last_reminder_date: Option<NaiveDate>,
    pub reminder_email_id: Option<String>,
    pub receipt_confirm_id: Option<String>,
}

impl Installment {
    pub fn is_open(&self) -> bool {
        matches!(self.status, InstState::Pending | InstState::Reminded)
    }
}
