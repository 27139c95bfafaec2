// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{ReceiptConfidence, ReceiptStatus};

/// §3 Receipt: immutable after insert, one per extracted bank-transfer proof
/// (real or synthetic, for subscription installments — see §4.11).
#[derive(Clone, Debug, PartialEq, FromRow, Deserialize, Serialize)]
pub struct Receipt {
    pub receipt_id: String,
    pub pledge_id: String,
    pub processed_at: DateTime<Utc>,
    pub email_date: NaiveDate,
    pub transfer_date: Option<NaiveDate>,
    pub amount_declared: i64,
    pub amount_verified: i64,
    pub confidence: ReceiptConfidence,
    pub stored_file_handle: Option<String>,
    pub original_filename: Option<String>,
    pub status: ReceiptStatus,
}

impl Receipt {
    pub fn is_valid(&self) -> bool {
        self.status == ReceiptStatus::Valid
    }
}
