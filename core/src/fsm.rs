// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Transition guards shared by the allocation service, receipt processor,
//! watchdog, and subscription engine. The adjacency tables themselves live
//! on the enums in `pledger_common::models` (`allowed_next`); this module
//! is just the uniform "fail with `InvalidTransition`, write nothing" guard
//! described in §4.7.

use pledger_common::error::{Error, Result};
use pledger_common::models::{AllocState, InstState, PledgeState, SubState};

pub fn pledge_transition(entity_id: &str, from: PledgeState, to: PledgeState) -> Result<()> {
    if from == to || from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            entity: "pledge",
            id: entity_id.to_string(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

pub fn allocation_transition(entity_id: &str, from: AllocState, to: AllocState) -> Result<()> {
    if from == to || from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            entity: "allocation",
            id: entity_id.to_string(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

pub fn subscription_transition(entity_id: &str, from: SubState, to: SubState) -> Result<()> {
    if from == to || from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            entity: "subscription",
            id: entity_id.to_string(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

pub fn installment_transition(entity_id: &str, from: InstState, to: InstState) -> Result<()> {
    if from == to || from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            entity: "installment",
            id: entity_id.to_string(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_illegal_pledge_transition() {
        let err = pledge_transition("PLEDGE-2026-1", PledgeState::Pledged, PledgeState::Closed).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn allows_legal_allocation_transition() {
        allocation_transition("ALLOC-1", AllocState::HostelVerified, AllocState::StudentVerification).unwrap();
    }
}
