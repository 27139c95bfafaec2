// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

mod gemini;

pub use gemini::GeminiOracle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::mail::Attachment;

/// MIME types the oracle will consider for receipt extraction (§4.5).
/// Anything else, or anything over 20 MiB, is dropped before the call.
pub const ALLOWED_ATTACHMENT_MIME: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heic",
    "image/heif",
    "application/pdf",
];
pub const MAX_ATTACHMENT_BYTES_FOR_AI: usize = 20 * 1024 * 1024;

pub fn admissible_attachments(attachments: &[Attachment]) -> Vec<&Attachment> {
    attachments
        .iter()
        .filter(|a| {
            ALLOWED_ATTACHMENT_MIME.contains(&a.mime_type.as_str())
                && a.len() <= MAX_ATTACHMENT_BYTES_FOR_AI
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptCategory {
    ReceiptSubmission,
    Question,
    Irrelevant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConfidenceDetails {
    pub amount_match: bool,
    pub name_match: bool,
    pub destination_match: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ValidReceipt {
    pub filename: String,
    pub amount: i64,
    pub amount_declared: i64,
    pub date: String,
    pub sender_name: String,
    pub confidence_score: Confidence,
    pub confidence_details: ConfidenceDetails,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReceiptAnalysis {
    pub category: ReceiptCategory,
    pub summary: String,
    pub valid_receipts: Vec<ValidReceipt>,
    pub suggested_reply: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyStatus {
    ConfirmedAll,
    Partial,
    Ambiguous,
    Query,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReplyAnalysis {
    pub status: ReplyStatus,
    pub confirmed_alloc_ids: Vec<String>,
    pub reasoning: String,
}

/// Two typed calls (§4.5). Both return `None` on any failure — network,
/// parse, schema violation, or safety block — so callers branch on the
/// returned enum, never on raw model text.
#[async_trait]
pub trait AiOracle: Send + Sync {
    async fn extract_receipts(
        &self,
        email_text: &str,
        attachments: &[Attachment],
        pledge_date: chrono::NaiveDate,
        email_date: chrono::NaiveDate,
        expected_amount: i64,
    ) -> Option<ReceiptAnalysis>;

    async fn classify_reply(
        &self,
        email_text: &str,
        open_allocations: &[String],
    ) -> Option<ReplyAnalysis>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Attachment;

    #[test]
    fn admissible_attachments_filters_mime_and_size() {
        let ok = Attachment {
            filename: "r.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![0u8; 10],
        };
        let wrong_mime = Attachment {
            filename: "r.exe".into(),
            mime_type: "application/octet-stream".into(),
            bytes: vec![0u8; 10],
        };
        let too_big = Attachment {
            filename: "r.pdf".into(),
            mime_type: "application/pdf".into(),
            bytes: vec![0u8; MAX_ATTACHMENT_BYTES_FOR_AI + 1],
        };
        let admissible = admissible_attachments(&[ok.clone(), wrong_mime, too_big]);
        assert_eq!(admissible.len(), 1);
        assert_eq!(admissible[0].filename, ok.filename);
    }
}
