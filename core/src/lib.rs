// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

pub mod allocation;
pub mod fsm;
pub mod ledger;
pub mod subscription;

pub use allocation::{AllocationService, StudentTarget};
pub use subscription::SubscriptionEngine;
