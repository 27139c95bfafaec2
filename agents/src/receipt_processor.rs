// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! §4.9: the every-10-minute scan of inbound receipt threads. No named lock
//! is taken here — every write this agent makes only ever increases a
//! pledge's verified total, so two overlapping ticks can race without
//! violating the allocation invariant (§4.8's lock exists to protect
//! *spending*, not *receiving*).

use std::sync::Arc;
use std::time::Duration;

use pledger_common::ai::{admissible_attachments, AiOracle, ReceiptCategory};
use pledger_common::audit::{AiAuditLog, AuditEntry, AuditKind, AuditLog};
use pledger_common::blob::BlobStore;
use pledger_common::clock::Clock;
use pledger_common::config::Config;
use pledger_common::error::Result;
use pledger_common::ids::IdGenerator;
use pledger_common::mail::{thread_context, MailGateway, Thread};
use pledger_common::models::{PledgeState, Receipt, ReceiptConfidence, ReceiptStatus};
use pledger_common::lock::NamedLock;
use pledger_common::store::Store;
use pledger_common::template::{fetch_or_default, handles, RawTemplate, TemplateRenderer};
use pledger_core::SubscriptionEngine;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::refs;

pub const LABEL_TO_PROCESS: &str = "Receipts/To-Process";
pub const LABEL_PROCESSED: &str = "Receipts/Processed";
pub const LABEL_DONOR_QUERY: &str = "Donor-Query";
pub const LABEL_MANUAL_REVIEW: &str = "Manual-Review";

const MAX_HISTORY: usize = 5;

pub struct ReceiptProcessor<L: NamedLock + Clone + 'static> {
    store: Store,
    mail: Arc<dyn MailGateway>,
    ai: Arc<dyn AiOracle>,
    ai_audit: AiAuditLog,
    audit: AuditLog,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    subscriptions: Arc<SubscriptionEngine<L>>,
    config: Config,
    ids: IdGenerator,
}

impl<L: NamedLock + Clone + 'static> ReceiptProcessor<L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        mail: Arc<dyn MailGateway>,
        ai: Arc<dyn AiOracle>,
        ai_audit: AiAuditLog,
        audit: AuditLog,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        subscriptions: Arc<SubscriptionEngine<L>>,
        config: Config,
    ) -> Self {
        Self {
            store,
            mail,
            ai,
            ai_audit,
            audit,
            blobs,
            clock,
            subscriptions,
            config,
            ids: IdGenerator,
        }
    }

    pub async fn run_once(&self) -> Result<()> {
        let threads = self.mail.threads_with_label(LABEL_TO_PROCESS).await?;
        info!(count = threads.len(), "receipt processor scanning threads");
        for thread in threads {
            if let Err(e) = self.process_thread(&thread).await {
                warn!(error = %e, thread_id = %thread.thread_id, "receipt processor failed on thread, will retry next tick");
            }
        }
        Ok(())
    }

    async fn process_thread(&self, thread: &Thread) -> Result<()> {
        let Some(latest) = thread.messages.iter().max_by_key(|m| m.sent_at) else {
            return Ok(());
        };

        // Step 1: pledge/batch reference lives in the most recent subject.
        let Some(pledge_id) = refs::last_pledge_id(&latest.subject) else {
            info!(thread_id = %thread.thread_id, "no pledge reference in subject, leaving unlabeled for manual triage");
            self.mail.add_label(&thread.thread_id, LABEL_MANUAL_REVIEW).await?;
            self.mail.remove_label(&thread.thread_id, LABEL_TO_PROCESS).await?;
            return Ok(());
        };

        // Step 2: internal senders (hostel/UAO/chapter leads) never go through
        // AI extraction — their mail is administrative, not a donor receipt.
        if self.config.is_internal_sender(&latest.from) {
            self.mail.remove_label(&thread.thread_id, LABEL_TO_PROCESS).await?;
            return Ok(());
        }

        let Some(pledge) = self.store.get_pledge(&pledge_id).await? else {
            warn!(pledge_id, thread_id = %thread.thread_id, "referenced pledge does not exist");
            self.mail.add_label(&thread.thread_id, LABEL_MANUAL_REVIEW).await?;
            self.mail.remove_label(&thread.thread_id, LABEL_TO_PROCESS).await?;
            return Ok(());
        };

        // Step 4: subscriptions skip AI extraction entirely — a recurring
        // donor's proof is routed straight to the installment ledger.
        if let Some(subscription) = self.store.get_subscription(&pledge_id).await? {
            let admissible = admissible_attachments(&latest.attachments);
            let blob_handle = match admissible.first() {
                Some(att) => Some(self.blobs.put(&pledge_id, &att.filename, &att.bytes).await?.0),
                None => None,
            };
            self.subscriptions
                .record_subscription_payment(&subscription.subscription_id, blob_handle, subscription.monthly_amount)
                .await?;
            self.mail.add_label(&thread.thread_id, LABEL_PROCESSED).await?;
            self.mail.remove_label(&thread.thread_id, LABEL_TO_PROCESS).await?;
            return Ok(());
        }

        self.process_one_time_receipt(thread, &pledge_id, latest).await
    }

    async fn process_one_time_receipt(
        &self,
        thread: &Thread,
        pledge_id: &str,
        latest: &pledger_common::mail::Message,
    ) -> Result<()> {
        let pledge = self
            .store
            .get_pledge(pledge_id)
            .await?
            .expect("pledge existence already checked by caller");

        let ctx = thread_context(thread, MAX_HISTORY);
        let pledge_date = pledge.submitted_at.date_naive();
        let email_date = latest.sent_at.date_naive();

        let analysis = self
            .ai
            .extract_receipts(&ctx.combined, &latest.attachments, pledge_date, email_date, pledge.outstanding)
            .await;

        let now = self.clock.now();
        self.ai_audit
            .record(
                now,
                "extract_receipts",
                pledge_id,
                analysis.is_some(),
                analysis.as_ref().and_then(|a| serde_json::to_string(a).ok()).as_deref(),
            )
            .await;

        let Some(analysis) = analysis else {
            warn!(pledge_id, thread_id = %thread.thread_id, "AI oracle returned nothing, retrying next tick");
            return Ok(());
        };

        if analysis.category == ReceiptCategory::Question {
            let reply = match analysis.suggested_reply {
                Some(reply) => reply,
                None => {
                    let template = fetch_or_default(
                        self.blobs.as_ref(),
                        handles::DONOR_QUERY_FALLBACK,
                        default_donor_query_fallback_template(),
                    )
                    .await;
                    TemplateRenderer::render(&template, &HashMap::new())?.html_body
                }
            };
            self.mail
                .send_or_reply(
                    &pledge.donor_email,
                    &format!("Ref: {pledge_id}"),
                    &reply,
                    &[pledger_common::mail::MessageId(latest.id.0.clone())],
                )
                .await?;
            self.mail.add_label(&thread.thread_id, LABEL_DONOR_QUERY).await?;
            self.mail.remove_label(&thread.thread_id, LABEL_TO_PROCESS).await?;
            self.audit
                .record(
                    now,
                    AuditEntry {
                        actor: "receipt-processor".to_string(),
                        kind: AuditKind::ReceiptProcessed,
                        target_id: pledge_id.to_string(),
                        action: "donor_query".to_string(),
                        before: None,
                        after: None,
                        metadata: serde_json::json!({ "summary": analysis.summary }),
                    },
                )
                .await;
            return Ok(());
        }

        if analysis.valid_receipts.is_empty() {
            self.mail.add_label(&thread.thread_id, LABEL_MANUAL_REVIEW).await?;
            self.mail.remove_label(&thread.thread_id, LABEL_TO_PROCESS).await?;
            self.audit
                .record(
                    now,
                    AuditEntry {
                        actor: "receipt-processor".to_string(),
                        kind: AuditKind::ReceiptProcessed,
                        target_id: pledge_id.to_string(),
                        action: "no_valid_receipts".to_string(),
                        before: None,
                        after: None,
                        metadata: serde_json::json!({ "summary": analysis.summary }),
                    },
                )
                .await;
            return Ok(());
        }

        let mut receipt_count = self.store.count_receipts_for_pledge(pledge_id).await?;
        let mut session_total_verified = 0i64;
        let mut inserted = Vec::new();

        let mut tx = self.store.begin().await?;
        for valid in &analysis.valid_receipts {
            let Some(attachment) = latest.attachments.iter().find(|a| a.filename == valid.filename) else {
                continue;
            };
            receipt_count += 1;
            let receipt_id = self.ids.receipt_id(pledge_id, receipt_count);
            let blob_handle = self.blobs.put(pledge_id, &attachment.filename, &attachment.bytes).await?;
            let transfer_date = chrono::NaiveDate::parse_from_str(&valid.date, "%Y-%m-%d").ok();

            let receipt = Receipt {
                receipt_id: receipt_id.clone(),
                pledge_id: pledge_id.to_string(),
                processed_at: now,
                email_date,
                transfer_date,
                amount_declared: valid.amount_declared,
                amount_verified: valid.amount,
                confidence: ReceiptConfidence::from(valid.confidence_score),
                stored_file_handle: Some(blob_handle.0),
                original_filename: Some(valid.filename.clone()),
                status: ReceiptStatus::Valid,
            };
            self.store.insert_receipt(&mut tx, &receipt).await?;
            session_total_verified += valid.amount;
            inserted.push(receipt_id);
        }

        if inserted.is_empty() {
            tx.rollback().await?;
            self.mail.add_label(&thread.thread_id, LABEL_MANUAL_REVIEW).await?;
            self.mail.remove_label(&thread.thread_id, LABEL_TO_PROCESS).await?;
            return Ok(());
        }

        let new_total = pledge.verified_total + session_total_verified;
        let allocated = self.store.sum_allocations_for_pledge(pledge_id).await?;
        let new_balance = new_total - allocated;
        let new_outstanding = (pledge.committed_amount - new_total).max(0);
        let computed_status = if new_total >= pledge.committed_amount {
            PledgeState::ProofSubmitted
        } else {
            PledgeState::PartialReceipt
        };
        // Once allocation has begun, further receipts only raise the
        // verified total — the lifecycle status is no longer receipt-driven
        // and must not be stomped back to PROOF_SUBMITTED/PARTIAL_RECEIPT.
        let resolved_status = if pledge.status == computed_status || pledge.status.can_transition_to(computed_status) {
            computed_status
        } else {
            pledge.status
        };

        self.store
            .update_pledge_after_receipt(
                &mut tx,
                pledge_id,
                new_total,
                new_balance,
                new_outstanding,
                resolved_status,
                Some(&latest.id.0),
            )
            .await?;
        tx.commit().await?;

        self.mail.add_label(&thread.thread_id, LABEL_PROCESSED).await?;
        self.mail.remove_label(&thread.thread_id, LABEL_TO_PROCESS).await?;

        self.audit
            .record(
                now,
                AuditEntry {
                    actor: "receipt-processor".to_string(),
                    kind: AuditKind::ReceiptProcessed,
                    target_id: pledge_id.to_string(),
                    action: "receipts_verified".to_string(),
                    before: None,
                    after: serde_json::json!({ "receipt_ids": inserted, "new_total": new_total }).into(),
                    metadata: serde_json::json!({ "summary": analysis.summary }),
                },
            )
            .await;

        info!(pledge_id, session_total_verified, "receipts processed");
        Ok(())
    }
}

fn default_donor_query_fallback_template() -> RawTemplate {
    RawTemplate {
        subject: "Thanks for reaching out".to_string(),
        html_body: "Thank you, we'll follow up on this shortly.".to_string(),
    }
}

pub fn poll_interval() -> Duration {
    Duration::from_secs(10 * 60)
}
