// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use tracing::warn;

use crate::mail::Attachment;

use super::{admissible_attachments, AiOracle, ReceiptAnalysis, ReplyAnalysis};

/// HTTP adapter treating the model provider as an oracle (§1, §4.5, §9: "if
/// the provider cannot be configured to return structured output, the
/// adapter must validate against the schema and downgrade to null"). Every
/// failure mode collapses to `None`; no free text ever reaches business
/// logic. Mirrors the teacher's `map_with_retry`-wrapped external calls, but
/// downgrades to `None` on the first failure rather than retrying, per §4.5.
pub struct GeminiOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

const CALL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

impl GeminiOracle {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(client, api_key, model, DEFAULT_BASE_URL)
    }

    /// Same as [`GeminiOracle::new`] but pointed at an arbitrary base URL,
    /// so tests can stand up a `wiremock` server in place of the real API.
    pub fn with_base_url(
        client: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        )
    }

    async fn call_for_json(&self, prompt: &str, attachments: &[Attachment]) -> Option<serde_json::Value> {
        let mut parts = vec![json!({ "text": prompt })];
        for attachment in admissible_attachments(attachments) {
            parts.push(json!({
                "inline_data": {
                    "mime_type": attachment.mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(&attachment.bytes),
                }
            }));
        }

        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "response_mime_type": "application/json" },
        });

        let request = self.client.post(self.endpoint()).json(&body).send();
        let response = match tokio::time::timeout(CALL_TIMEOUT, request).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                warn!(error = %e, "AI oracle request failed");
                return None;
            }
            Err(_) => {
                warn!("AI oracle request timed out after {:?}", CALL_TIMEOUT);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "AI oracle returned non-success status");
            return None;
        }

        let envelope: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "AI oracle response was not valid JSON");
                return None;
            }
        };

        let text = envelope
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())?;

        match serde_json::from_str(text) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "AI oracle response failed schema parse");
                None
            }
        }
    }
}

#[async_trait]
impl AiOracle for GeminiOracle {
    async fn extract_receipts(
        &self,
        email_text: &str,
        attachments: &[Attachment],
        pledge_date: chrono::NaiveDate,
        email_date: chrono::NaiveDate,
        expected_amount: i64,
    ) -> Option<ReceiptAnalysis> {
        let prompt = format!(
            "You are a cautious bank-transfer receipt verifier. Prefer MEDIUM or LOW \
             confidence over inventing values when ambiguous. Pledge date: {pledge_date}. \
             Email date: {email_date}. Expected amount: {expected_amount}. \
             Email body:\n{email_text}\n\
             Respond only with JSON matching the ReceiptAnalysis schema."
        );
        let value = self.call_for_json(&prompt, attachments).await?;
        match serde_json::from_value(value) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!(error = %e, "ReceiptAnalysis did not match the enforced schema");
                None
            }
        }
    }

    async fn classify_reply(
        &self,
        email_text: &str,
        open_allocations: &[String],
    ) -> Option<ReplyAnalysis> {
        let prompt = format!(
            "Classify this hostel/UAO reply against the open allocation ids {open_allocations:?}. \
             Explicit identifier mentions (allocation id, student id, amount, donor name) are \
             definitive. A single open allocation plus a bare \"confirmed\" implies \
             CONFIRMED_ALL of that one allocation. Multiple open allocations plus a vague \
             affirmation implies AMBIGUOUS. Any negative or question phrase implies QUERY.\n\
             Email body:\n{email_text}\n\
             Respond only with JSON matching the ReplyAnalysis schema."
        );
        let value = self.call_for_json(&prompt, &[]).await?;
        match serde_json::from_value::<ReplyAnalysis>(value) {
            Ok(analysis) => {
                let confirmed = analysis
                    .confirmed_alloc_ids
                    .iter()
                    .all(|id| open_allocations.contains(id));
                if confirmed {
                    Some(analysis)
                } else {
                    warn!("ReplyAnalysis referenced an allocation id outside the open set");
                    None
                }
            }
            Err(e) => {
                warn!(error = %e, "ReplyAnalysis did not match the enforced schema");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_receipt_json() -> serde_json::Value {
        json!({
            "category": "RECEIPT_SUBMISSION",
            "summary": "one receipt attached",
            "valid_receipts": [{
                "filename": "r.png",
                "amount": 25000,
                "amount_declared": 25000,
                "date": "2026-01-05",
                "sender_name": "Amina",
                "confidence_score": "HIGH",
                "confidence_details": {
                    "amount_match": true,
                    "name_match": true,
                    "destination_match": true
                }
            }],
            "suggested_reply": null
        })
    }

    #[tokio::test]
    async fn returns_none_on_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let oracle = GeminiOracle::with_base_url(reqwest::Client::new(), "key", "model", server.uri());
        let today = chrono::Utc::now().date_naive();
        let result = oracle.extract_receipts("hello", &[], today, today, 1000).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn extracts_valid_schema_response() {
        let server = MockServer::start().await;
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [{ "text": sample_receipt_json().to_string() }]
                }
            }]
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let oracle = GeminiOracle::with_base_url(reqwest::Client::new(), "key", "model", server.uri());
        let today = chrono::Utc::now().date_naive();
        let result = oracle
            .extract_receipts("hello", &[], today, today, 25000)
            .await
            .unwrap();
        assert_eq!(result.valid_receipts.len(), 1);
    }

    #[tokio::test]
    async fn classify_reply_rejects_ids_outside_open_set() {
        let server = MockServer::start().await;
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [{ "text": json!({
                        "status": "CONFIRMED_ALL",
                        "confirmed_alloc_ids": ["ALLOC-not-open"],
                        "reasoning": "..."
                    }).to_string() }]
                }
            }]
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let oracle = GeminiOracle::with_base_url(reqwest::Client::new(), "key", "model", server.uri());
        let result = oracle
            .classify_reply("Confirmed.", &["ALLOC-open-1".to_string()])
            .await;
        assert!(result.is_none());
    }

    #[test]
    fn schema_round_trips() {
        let value = sample_receipt_json();
        let analysis: ReceiptAnalysis = serde_json::from_value(value).unwrap();
        assert_eq!(analysis.valid_receipts.len(), 1);
        assert_eq!(analysis.valid_receipts[0].confidence_score, crate::ai::Confidence::High);
    }
}
