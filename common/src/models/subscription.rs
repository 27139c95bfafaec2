// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::SubState;

/// §3 Subscription: at most one per recurring pledge, `subscriptionId ==
/// pledgeId`. Owns exactly `durationMonths` Installments (§4.11).
#[derive(Clone, Debug, PartialEq, FromRow, Deserialize, Serialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub donor_email: String,
    pub donor_display_name: String,
    pub monthly_amount: i64,
    pub duration_months: i32,
    pub start_date: NaiveDate,
    pub next_due_date: NaiveDate,
    pub payments_received: i32,
    pub amount_received: i64,
    pub last_reminder_date: Option<NaiveDate>,
    pub last_receipt_date: Option<NaiveDate>,
    pub status: SubState,
    pub welcome_message_id: Option<String>,
    pub completion_message_id: Option<String>,
    pub linked_student_ids: String,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn linked_student_id_list(&self) -> Vec<&str> {
        self.linked_student_ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.payments_received >= self.duration_months
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linked_student_id_list_splits_and_trims() {
        let mut s = sample();
        s.linked_student_ids = "CMS-1, CMS-2,CMS-3".into();
        assert_eq!(s.linked_student_id_list(), vec!["CMS-1", "CMS-2", "CMS-3"]);
    }

    fn sample() -> Subscription {
        Subscription {
            subscription_id: "PLEDGE-2026-1".into(),
            donor_email: "donor@example.com".into(),
            donor_display_name: "Donor".into(),
            monthly_amount: 5_000,
            duration_months: 12,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            next_due_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            payments_received: 1,
            amount_received: 5_000,
            last_reminder_date: None,
            last_receipt_date: None,
            status: SubState::Active,
            welcome_message_id: None,
            completion_message_id: None,
            linked_student_ids: String::new(),
            created_at: Utc::now(),
        }
    }
}
