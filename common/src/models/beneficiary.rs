// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::StudentState;

/// §3 Beneficiary: confidential, shared across many Allocations. Totals are
/// recomputed by the sync job after every allocation rather than maintained
/// incrementally, since a crash mid-allocation must never leave them
/// inconsistent with the ledger of record (the Allocation rows).
#[derive(Clone, Debug, PartialEq, FromRow, Deserialize, Serialize)]
pub struct Beneficiary {
    pub cms_id: String,
    pub name: String,
    pub gender: String,
    pub school: String,
    pub degree: String,
    pub total_due: i64,
    pub amount_cleared: i64,
    pub pending_amount: i64,
    pub status: StudentState,
}

impl Beneficiary {
    /// §3 invariants: `amountCleared = Σ allocations.amount`, `pendingAmount
    /// = totalDue − amountCleared`, `pendingAmount ≥ 0`.
    pub fn resync(&mut self, amount_cleared: i64) {
        self.amount_cleared = amount_cleared;
        self.pending_amount = (self.total_due - amount_cleared).max(0);
        self.status = StudentState::from_amounts(self.total_due, amount_cleared);
    }

    pub fn remaining_need(&self) -> i64 {
        self.pending_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resync_clamps_pending_amount_at_zero() {
        let mut b = Beneficiary {
            cms_id: "CMS-1".into(),
            name: "S".into(),
            gender: "F".into(),
            school: "School".into(),
            degree: "BSc".into(),
            total_due: 10_000,
            amount_cleared: 0,
            pending_amount: 10_000,
            status: StudentState::Pending,
        };
        b.resync(12_000);
        assert_eq!(b.pending_amount, 0);
        assert_eq!(b.status, StudentState::Cleared);
    }
}
