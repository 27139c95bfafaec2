// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::PledgeState;

/// §3 Pledge: one row per form submission. `verified_total`, `cash_balance`
/// and `outstanding` are maintained as invariants by the Receipt Processor
/// and Allocation Service rather than computed on read, mirroring the
/// teacher's denormalized `signaled_rav_request_count` column on
/// `sender_allocation.rs`'s `AllocationSummary`.
#[derive(Clone, Debug, PartialEq, FromRow, Deserialize, Serialize)]
pub struct Pledge {
    pub pledge_id: String,
    pub donor_email: String,
    pub donor_display_name: String,
    pub chapter: String,
    pub affiliation: String,
    pub zakat: bool,
    pub duration_code: String,
    pub committed_amount: i64,
    pub status: PledgeState,
    pub submitted_at: DateTime<Utc>,
    pub confirmation_message_id: Option<String>,
    pub receipt_message_id: Option<String>,
    pub verified_total: i64,
    pub cash_balance: i64,
    pub outstanding: i64,
}

impl Pledge {
    /// §3 invariant: `cashBalance = verifiedTotal − Σ allocations.amount`.
    pub fn recompute_balances(&mut self, allocated_total: i64) {
        self.cash_balance = self.verified_total - allocated_total;
        self.outstanding = self.committed_amount - self.verified_total;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            PledgeState::Closed | PledgeState::Rejected | PledgeState::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Pledge {
        Pledge {
            pledge_id: "PLEDGE-2026-1".into(),
            donor_email: "donor@example.com".into(),
            donor_display_name: "Donor".into(),
            chapter: "default".into(),
            affiliation: "alumni".into(),
            zakat: false,
            duration_code: "ONE_TIME".into(),
            committed_amount: 100_000,
            status: PledgeState::Verified,
            submitted_at: Utc::now(),
            confirmation_message_id: None,
            receipt_message_id: None,
            verified_total: 100_000,
            cash_balance: 100_000,
            outstanding: 0,
        }
    }

    #[test]
    fn recompute_balances_keeps_invariant() {
        let mut p = sample();
        p.recompute_balances(40_000);
        assert_eq!(p.cash_balance, 60_000);
        assert_eq!(p.outstanding, 0);
    }
}
