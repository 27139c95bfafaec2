// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

mod allocation;
mod beneficiary;
mod enums;
mod installment;
mod pledge;
mod receipt;
pub mod reporting;
mod subscription;

pub use allocation::Allocation;
pub use beneficiary::Beneficiary;
pub use enums::{
    AllocState, Confidence as ReceiptConfidence, InstState, PledgeState, ReceiptStatus, StudentState, SubState,
};
pub use installment::Installment;
pub use pledge::Pledge;
pub use receipt::Receipt;
pub use subscription::Subscription;
