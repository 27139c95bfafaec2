// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use sqlx::Type;

/// §4.7 Pledge FSM. `FullyAllocated` and `ProofSubmitted` are kept distinct
/// (§9 open question resolved): the source aliased them to the same string
/// literal, but a closed enum must not silently merge two different points
/// in the lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PledgeState {
    Pledged,
    PartialReceipt,
    ProofSubmitted,
    Verified,
    PartiallyAllocated,
    FullyAllocated,
    Closed,
    Rejected,
    Cancelled,
}

impl PledgeState {
    /// The adjacency map behind §4.7's Pledge FSM, as a compile-time table.
    pub fn allowed_next(self) -> &'static [PledgeState] {
        use PledgeState::*;
        match self {
            Pledged => &[PartialReceipt, ProofSubmitted, Cancelled],
            PartialReceipt => &[PartialReceipt, ProofSubmitted, Cancelled],
            ProofSubmitted => &[Verified, PartiallyAllocated, Rejected],
            Verified => &[PartiallyAllocated, FullyAllocated],
            PartiallyAllocated => &[FullyAllocated, Verified],
            FullyAllocated => &[Closed, PartiallyAllocated],
            Closed => &[],
            Rejected => &[],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: PledgeState) -> bool {
        self.allowed_next().contains(&next)
    }

    /// The same `SCREAMING_SNAKE_CASE` text stored in the `status` column,
    /// for read-only surfaces (§4.12) that report status without round-
    /// tripping through the store.
    pub fn as_str(self) -> &'static str {
        use PledgeState::*;
        match self {
            Pledged => "PLEDGED",
            PartialReceipt => "PARTIAL_RECEIPT",
            ProofSubmitted => "PROOF_SUBMITTED",
            Verified => "VERIFIED",
            PartiallyAllocated => "PARTIALLY_ALLOCATED",
            FullyAllocated => "FULLY_ALLOCATED",
            Closed => "CLOSED",
            Rejected => "REJECTED",
            Cancelled => "CANCELLED",
        }
    }
}

/// §4.7 Allocation FSM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocState {
    PendingHostel,
    HostelQuery,
    HostelVerified,
    StudentVerification,
    Completed,
    Disputed,
    Cancelled,
}

impl AllocState {
    pub fn allowed_next(self) -> &'static [AllocState] {
        use AllocState::*;
        match self {
            PendingHostel => &[HostelVerified, HostelQuery, Cancelled],
            HostelQuery => &[PendingHostel, Cancelled],
            HostelVerified => &[StudentVerification],
            StudentVerification => &[Completed, Disputed],
            Completed => &[],
            Disputed => &[],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: AllocState) -> bool {
        self.allowed_next().contains(&next)
    }
}

/// §4.7 Subscription FSM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubState {
    Active,
    Overdue,
    Lapsed,
    Completed,
    Cancelled,
    Paused,
}

impl SubState {
    pub fn allowed_next(self) -> &'static [SubState] {
        use SubState::*;
        match self {
            Active => &[Overdue, Completed, Cancelled, Paused],
            Overdue => &[Active, Lapsed, Completed, Cancelled, Paused],
            Lapsed => &[Active, Completed, Cancelled, Paused],
            Paused => &[Active],
            Completed => &[],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: SubState) -> bool {
        self.allowed_next().contains(&next)
    }
}

/// §4.7 Installment FSM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstState {
    Pending,
    Reminded,
    Received,
    Allocated,
    Missed,
}

impl InstState {
    pub fn allowed_next(self) -> &'static [InstState] {
        use InstState::*;
        match self {
            Pending => &[Reminded, Received, Missed],
            Reminded => &[Received, Missed],
            Received => &[Allocated],
            Allocated => &[],
            Missed => &[],
        }
    }

    pub fn can_transition_to(self, next: InstState) -> bool {
        self.allowed_next().contains(&next)
    }
}

/// Receipt confidence (§3): AI-assigned HIGH/MEDIUM/LOW, plus UNKNOWN for
/// synthetic (subscription) receipts that never went through AI extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unknown,
}

impl From<crate::ai::Confidence> for Confidence {
    fn from(value: crate::ai::Confidence) -> Self {
        match value {
            crate::ai::Confidence::High => Confidence::High,
            crate::ai::Confidence::Medium => Confidence::Medium,
            crate::ai::Confidence::Low => Confidence::Low,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    Valid,
    RequiresReview,
    Rejected,
}

/// Beneficiary status (§3), derived from `pendingAmount` rather than stored
/// independently: recomputed by the same sync job that recomputes the
/// aggregates, so it can never drift from them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentState {
    Pending,
    PartiallyCleared,
    Cleared,
}

impl StudentState {
    pub fn from_amounts(total_due: i64, amount_cleared: i64) -> Self {
        if amount_cleared <= 0 {
            StudentState::Pending
        } else if amount_cleared >= total_due {
            StudentState::Cleared
        } else {
            StudentState::PartiallyCleared
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pledge_fsm_matches_spec_adjacency() {
        assert!(PledgeState::Pledged.can_transition_to(PledgeState::PartialReceipt));
        assert!(PledgeState::Pledged.can_transition_to(PledgeState::ProofSubmitted));
        assert!(!PledgeState::Pledged.can_transition_to(PledgeState::FullyAllocated));
        assert!(PledgeState::FullyAllocated.can_transition_to(PledgeState::Closed));
        assert!(PledgeState::FullyAllocated.can_transition_to(PledgeState::PartiallyAllocated));
        assert!(!PledgeState::Closed.can_transition_to(PledgeState::Pledged));
    }

    #[test]
    fn as_str_matches_stored_text() {
        assert_eq!(PledgeState::FullyAllocated.as_str(), "FULLY_ALLOCATED");
        assert_eq!(PledgeState::Pledged.as_str(), "PLEDGED");
    }

    #[test]
    fn allocation_fsm_matches_spec_adjacency() {
        assert!(AllocState::PendingHostel.can_transition_to(AllocState::HostelVerified));
        assert!(AllocState::HostelVerified.can_transition_to(AllocState::StudentVerification));
        assert!(!AllocState::HostelVerified.can_transition_to(AllocState::PendingHostel));
        assert!(!AllocState::Completed.can_transition_to(AllocState::Disputed));
    }

    #[test]
    fn installment_fsm_matches_spec_adjacency() {
        assert!(InstState::Pending.can_transition_to(InstState::Reminded));
        assert!(InstState::Reminded.can_transition_to(InstState::Missed));
        assert!(!InstState::Allocated.can_transition_to(InstState::Received));
    }
}
