// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! §4.8: the allocation critical section. Every write path here runs inside
//! `with_lock("alloc", 30s)` and follows the commit-last property — outbound
//! mail is sent before any row is appended, so a crash before the send
//! leaves no trace and a crash after it surfaces as an orphan email rather
//! than a silent double-spend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pledger_common::audit::{AuditEntry, AuditKind, AuditLog};
use pledger_common::blob::{guess_mime_type, BlobHandle, BlobStore};
use pledger_common::clock::Clock;
use pledger_common::config::Config;
use pledger_common::error::{Error, Result};
use pledger_common::ids::IdGenerator;
use pledger_common::lock::NamedLock;
use pledger_common::mail::{overflow_note, Attachment, MailGateway, MessageId};
use pledger_common::models::{Allocation, PledgeState, Receipt};
use pledger_common::store::Store;
use pledger_common::template::{fetch_or_default, handles, RawTemplate, TemplateRenderer};
use tracing::{info, warn};

use crate::fsm;
use crate::ledger;

const LOCK_WAIT: Duration = Duration::from_secs(30);
const SEND_TIMEOUT: Duration = Duration::from_secs(120);

async fn send_with_timeout<F>(fut: F) -> Result<MessageId>
where
    F: std::future::Future<Output = Result<MessageId>>,
{
    match tokio::time::timeout(SEND_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::MailSendFailed(format!(
            "send did not complete within {SEND_TIMEOUT:?}"
        ))),
    }
}

/// A single student target for batch allocation (§4.8.2): either a bare
/// `cms_id` (equal split) or an explicit `{cms_id, amount}`.
#[derive(Clone, Debug)]
pub struct StudentTarget {
    pub cms_id: String,
    pub amount: Option<i64>,
}

pub struct AllocationService<L: NamedLock> {
    store: Store,
    mail: Arc<dyn MailGateway>,
    blobs: Arc<dyn BlobStore>,
    audit: AuditLog,
    ids: IdGenerator,
    clock: Arc<dyn Clock>,
    lock: L,
    config: Config,
}

impl<L: NamedLock> AllocationService<L> {
    pub fn new(
        store: Store,
        mail: Arc<dyn MailGateway>,
        blobs: Arc<dyn BlobStore>,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
        lock: L,
        config: Config,
    ) -> Self {
        Self {
            store,
            mail,
            blobs,
            audit,
            ids: IdGenerator,
            clock,
            lock,
            config,
        }
    }

    /// §4.8.1 `process_allocation(pledge_id, cms_id, amount)`.
    pub async fn process_allocation(&self, pledge_id: &str, cms_id: &str, raw_amount: &str) -> Result<bool> {
        let pledge_id = pledge_id.to_string();
        let cms_id = cms_id.to_string();
        let raw_amount = raw_amount.to_string();

        self.lock
            .with_lock("alloc", LOCK_WAIT, move || {
                let this = self;
                Box::pin(async move { this.process_allocation_locked(&pledge_id, &cms_id, &raw_amount).await })
            })
            .await
    }

    async fn process_allocation_locked(&self, pledge_id: &str, cms_id: &str, raw_amount: &str) -> Result<bool> {
        let amount = ledger::parse_amount(raw_amount);
        if amount <= 0 || cms_id.is_empty() {
            return Err(Error::InvalidInput(format!(
                "amount must be positive and cms_id non-empty, got amount={amount} cms_id={cms_id:?}"
            )));
        }

        let pledge = self
            .store
            .get_pledge(pledge_id)
            .await?
            .ok_or_else(|| Error::NotFound(pledge_id.to_string()))?;

        if self.store.count_receipts_for_pledge(pledge_id).await? == 0 {
            return Err(Error::NoProof(pledge_id.to_string()));
        }

        let balance = ledger::pledge_balance(&self.store, pledge_id).await?;
        if amount > balance {
            return Err(Error::InsufficientFunds {
                requested: amount,
                available: balance,
            });
        }

        let need = ledger::student_need(&self.store, cms_id)
            .await?
            .ok_or_else(|| Error::UnknownStudent(cms_id.to_string()))?;
        if amount > need {
            return Err(Error::ExceedsNeed { requested: amount, need });
        }

        let now = self.clock.now();
        let alloc_id = self.ids.alloc_id(now);

        let receipts = self.store.list_verified_receipts_for_pledge(pledge_id).await?;
        let (attachments, overflow) = self.gather_receipt_attachments(&receipts).await?;

        let hostel_template = fetch_or_default(
            self.blobs.as_ref(),
            handles::HOSTEL_INTIMATION,
            default_hostel_intimation_template(),
        )
        .await;
        let mut hostel_values = HashMap::new();
        hostel_values.insert("pledgeId".to_string(), pledge_id.to_string());
        hostel_values.insert("allocId".to_string(), alloc_id.clone());
        hostel_values.insert("cmsId".to_string(), cms_id.to_string());
        hostel_values.insert("amount".to_string(), amount.to_string());
        hostel_values.insert(
            "overflowNote".to_string(),
            overflow.as_deref().map(|note| format!("<p>{note}</p>")).unwrap_or_default(),
        );
        let hostel_rendered = TemplateRenderer::render(&hostel_template, &hostel_values)?;
        let hostel_to = self.config.leads_for_chapter(&pledge.chapter).to_vec();
        let hostel_message_id = send_with_timeout(self.mail.send(
            &hostel_to,
            &[],
            &hostel_rendered.subject,
            &hostel_rendered.html_body,
            &attachments,
        ))
        .await?;

        let mut prior_ids = Vec::new();
        if let Some(id) = &pledge.receipt_message_id {
            prior_ids.push(MessageId(id.clone()));
        }
        if let Some(id) = &pledge.confirmation_message_id {
            prior_ids.push(MessageId(id.clone()));
        }
        let donor_template = fetch_or_default(
            self.blobs.as_ref(),
            handles::DONOR_INTERMEDIATE,
            default_donor_intermediate_template(),
        )
        .await;
        let mut donor_values = HashMap::new();
        donor_values.insert("refId".to_string(), alloc_id.clone());
        donor_values.insert("amount".to_string(), amount.to_string());
        let donor_rendered = TemplateRenderer::render(&donor_template, &donor_values)?;
        let donor_message_id = match send_with_timeout(self.mail.send_or_reply(
            &pledge.donor_email,
            &format!("Ref: {pledge_id}"),
            &donor_rendered.html_body,
            &prior_ids,
        ))
        .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, pledge_id, "donor intermediate notification failed; continuing");
                None
            }
        };

        let allocation = Allocation {
            alloc_id: alloc_id.clone(),
            cms_id: cms_id.to_string(),
            pledge_id: pledge_id.to_string(),
            verified_total_at_time_of_commit: pledge.verified_total,
            amount,
            created_at: now,
            status: pledger_common::models::AllocState::PendingHostel,
            hostel_intimation_message_id: Some(hostel_message_id.0.clone()),
            hostel_intimation_date: Some(now),
            donor_alloc_message_id: donor_message_id.as_ref().map(|m| m.0.clone()),
            donor_alloc_date: donor_message_id.as_ref().map(|_| now),
            hostel_reply_message_id: None,
            hostel_reply_date: None,
            donor_notify_message_id: None,
            donor_notify_date: None,
            batch_id: None,
            installment_id: None,
        };

        let new_status = if amount == balance {
            PledgeState::FullyAllocated
        } else {
            PledgeState::PartiallyAllocated
        };
        fsm::pledge_transition(pledge_id, pledge.status, new_status)?;

        let mut tx = self.store.begin().await?;
        let insert_result = self.store.insert_allocation(&mut tx, &allocation).await;
        if let Err(e) = insert_result {
            return Err(Error::OrphanEmail {
                message_id: hostel_message_id.0.clone(),
                target: pledge_id.to_string(),
                cause: e.to_string(),
            });
        }
        self.store.set_pledge_status(&mut tx, pledge_id, new_status).await?;
        self.store
            .set_pledge_cash_balance(&mut tx, pledge_id, balance - amount)
            .await?;
        self.store.resync_beneficiary(&mut tx, cms_id).await?;
        tx.commit().await?;

        self.audit
            .record(
                now,
                AuditEntry {
                    actor: "allocation-service".to_string(),
                    kind: AuditKind::Allocation,
                    target_id: alloc_id.clone(),
                    action: "process_allocation".to_string(),
                    before: None,
                    after: serde_json::to_value(&allocation).ok(),
                    metadata: serde_json::json!({ "pledge_id": pledge_id, "cms_id": cms_id }),
                },
            )
            .await;

        info!(pledge_id, cms_id, alloc_id, amount, "allocation committed");
        Ok(true)
    }

    /// Fetches the blob for every verified receipt on file and turns it into
    /// a `mail::Attachment`; degrades to an overflow note instead of
    /// attaching anything once the aggregate cap is exceeded (§4.8.1 step 7).
    async fn gather_receipt_attachments(&self, receipts: &[Receipt]) -> Result<(Vec<Attachment>, Option<String>)> {
        let mut attachments = Vec::with_capacity(receipts.len());
        for receipt in receipts {
            if let (Some(handle), Some(filename)) = (&receipt.stored_file_handle, &receipt.original_filename) {
                let bytes = self.blobs.get(&BlobHandle(handle.clone())).await?;
                attachments.push(Attachment {
                    filename: filename.clone(),
                    mime_type: guess_mime_type(filename),
                    bytes,
                });
            }
        }

        let folder_link = receipts
            .first()
            .and_then(|r| r.stored_file_handle.as_ref())
            .map(|handle| self.blobs.link(&BlobHandle(handle.clone())))
            .unwrap_or_default();

        match overflow_note(&attachments, &folder_link) {
            Some(note) => Ok((Vec::new(), Some(note))),
            None => Ok((attachments, None)),
        }
    }

    /// §4.8.2 `process_batch_allocation(pledge_ids, students)`. `installment_tag`
    /// is `Some` only when the batch was triggered by the monthly subscription
    /// sweep (§4.11), in which case every resulting row carries it.
    pub async fn process_batch_allocation(&self, pledge_ids: &[String], students: &[StudentTarget]) -> Result<bool> {
        self.process_batch_allocation_tagged(pledge_ids, students, None).await
    }

    pub async fn process_batch_allocation_tagged(
        &self,
        pledge_ids: &[String],
        students: &[StudentTarget],
        installment_tag: Option<String>,
    ) -> Result<bool> {
        let pledge_ids = pledge_ids.to_vec();
        let students = students.to_vec();
        self.lock
            .with_lock("alloc", LOCK_WAIT, move || {
                let this = self;
                Box::pin(async move {
                    this.process_batch_allocation_locked(&pledge_ids, &students, installment_tag.as_deref())
                        .await
                })
            })
            .await
    }

    async fn process_batch_allocation_locked(
        &self,
        pledge_ids: &[String],
        students: &[StudentTarget],
        installment_tag: Option<&str>,
    ) -> Result<bool> {
        let mut pledges = Vec::with_capacity(pledge_ids.len());
        for pledge_id in pledge_ids {
            let pledge = self
                .store
                .get_pledge(pledge_id)
                .await?
                .ok_or_else(|| Error::NotFound(pledge_id.clone()))?;
            pledges.push(pledge);
        }

        let mut pledge_remaining: HashMap<String, i64> = HashMap::new();
        for pledge in &pledges {
            let balance = ledger::pledge_balance(&self.store, &pledge.pledge_id).await?;
            pledge_remaining.insert(pledge.pledge_id.clone(), balance);
        }
        let original_remaining = pledge_remaining.clone();
        let total_available: i64 = pledge_remaining.values().sum();

        let mut student_need: HashMap<String, i64> = HashMap::new();
        let mut ordered_students = Vec::new();
        for target in students {
            let need = ledger::student_need(&self.store, &target.cms_id)
                .await?
                .ok_or_else(|| Error::UnknownStudent(target.cms_id.clone()))?;
            if need <= 0 {
                continue;
            }
            student_need.insert(target.cms_id.clone(), need);
            ordered_students.push(target.clone());
        }

        if ordered_students.is_empty() {
            return Ok(false);
        }

        let equal_split = total_available / ordered_students.len() as i64;
        let mut student_target: HashMap<String, i64> = HashMap::new();
        for target in &ordered_students {
            let need = student_need[&target.cms_id];
            let amount = target.amount.unwrap_or(equal_split).min(need).max(0);
            student_target.insert(target.cms_id.clone(), amount);
        }

        // §4.8.2 step 3: greedy distribution, input order both dimensions.
        let mut transfers: Vec<(String, String, i64)> = Vec::new();
        for target in &ordered_students {
            let mut remaining = student_target[&target.cms_id];
            for pledge in &pledges {
                if remaining <= 0 {
                    break;
                }
                let available = pledge_remaining.get_mut(&pledge.pledge_id).unwrap();
                let take = remaining.min(*available);
                if take <= 0 {
                    continue;
                }
                *available -= take;
                remaining -= take;
                transfers.push((pledge.pledge_id.clone(), target.cms_id.clone(), take));
            }
        }

        if transfers.is_empty() {
            return Ok(false);
        }

        let now = self.clock.now();
        let batch_id = self.ids.batch_id(now);

        let batch_template = fetch_or_default(
            self.blobs.as_ref(),
            handles::HOSTEL_INTIMATION_BATCH,
            default_batch_hostel_template(),
        )
        .await;
        let rows: String = transfers
            .iter()
            .map(|(pledge_id, cms_id, amount)| format!("<tr><td>{pledge_id}</td><td>{cms_id}</td><td>{amount}</td></tr>"))
            .collect();
        let mut batch_values = HashMap::new();
        batch_values.insert("batchId".to_string(), batch_id.clone());
        batch_values.insert("rows".to_string(), rows);
        let batch_rendered = TemplateRenderer::render(&batch_template, &batch_values)?;
        let hostel_to: Vec<String> = pledges
            .iter()
            .flat_map(|p| self.config.leads_for_chapter(&p.chapter).to_vec())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let hostel_message_id = send_with_timeout(self.mail.send(
            &hostel_to,
            &[],
            &batch_rendered.subject,
            &batch_rendered.html_body,
            &[],
        ))
        .await?;

        let mut allocations = Vec::with_capacity(transfers.len());
        for (pledge_id, cms_id, amount) in &transfers {
            let alloc_id = self.ids.alloc_id(now);
            allocations.push(Allocation {
                alloc_id,
                cms_id: cms_id.clone(),
                pledge_id: pledge_id.clone(),
                verified_total_at_time_of_commit: pledges
                    .iter()
                    .find(|p| &p.pledge_id == pledge_id)
                    .map(|p| p.verified_total)
                    .unwrap_or_default(),
                amount: *amount,
                created_at: now,
                status: pledger_common::models::AllocState::PendingHostel,
                hostel_intimation_message_id: Some(hostel_message_id.0.clone()),
                hostel_intimation_date: Some(now),
                donor_alloc_message_id: None,
                donor_alloc_date: None,
                hostel_reply_message_id: None,
                hostel_reply_date: None,
                donor_notify_message_id: None,
                donor_notify_date: None,
                batch_id: Some(batch_id.clone()),
                installment_id: installment_tag.map(str::to_string),
            });
        }

        let mut tx = self.store.begin().await?;
        for allocation in &allocations {
            if let Err(e) = self.store.insert_allocation(&mut tx, allocation).await {
                return Err(Error::OrphanEmail {
                    message_id: hostel_message_id.0.clone(),
                    target: batch_id.clone(),
                    cause: e.to_string(),
                });
            }
        }

        for pledge in &pledges {
            let remaining = pledge_remaining[&pledge.pledge_id];
            let untouched = remaining == original_remaining[&pledge.pledge_id];
            let new_status = if untouched {
                pledge.status
            } else if remaining == 0 {
                PledgeState::FullyAllocated
            } else {
                PledgeState::PartiallyAllocated
            };
            if new_status != pledge.status {
                fsm::pledge_transition(&pledge.pledge_id, pledge.status, new_status)?;
                self.store.set_pledge_status(&mut tx, &pledge.pledge_id, new_status).await?;
            }
            self.store
                .set_pledge_cash_balance(&mut tx, &pledge.pledge_id, remaining)
                .await?;
        }
        for target in &ordered_students {
            self.store.resync_beneficiary(&mut tx, &target.cms_id).await?;
        }
        tx.commit().await?;

        let donor_template = fetch_or_default(
            self.blobs.as_ref(),
            handles::DONOR_INTERMEDIATE,
            default_donor_intermediate_template(),
        )
        .await;
        for pledge in &pledges {
            let mut prior_ids = Vec::new();
            if let Some(id) = &pledge.receipt_message_id {
                prior_ids.push(MessageId(id.clone()));
            }
            if let Some(id) = &pledge.confirmation_message_id {
                prior_ids.push(MessageId(id.clone()));
            }
            let pledge_amount: i64 = transfers.iter().filter(|(p, ..)| p == &pledge.pledge_id).map(|(_, _, a)| a).sum();
            let mut donor_values = HashMap::new();
            donor_values.insert("refId".to_string(), batch_id.clone());
            donor_values.insert("amount".to_string(), pledge_amount.to_string());
            let donor_rendered = match TemplateRenderer::render(&donor_template, &donor_values) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, pledge_id = %pledge.pledge_id, "donor notification template render failed; continuing");
                    continue;
                }
            };
            if let Err(e) = send_with_timeout(self.mail.send_or_reply(
                &pledge.donor_email,
                &format!("Ref: {}", pledge.pledge_id),
                &donor_rendered.html_body,
                &prior_ids,
            ))
            .await
            {
                warn!(error = %e, pledge_id = %pledge.pledge_id, "per-pledge donor notification failed; continuing");
            }
        }

        self.audit
            .record(
                now,
                AuditEntry {
                    actor: "allocation-service".to_string(),
                    kind: AuditKind::Allocation,
                    target_id: batch_id.clone(),
                    action: "process_batch_allocation".to_string(),
                    before: None,
                    after: serde_json::json!({ "transfers": transfers.len() }).into(),
                    metadata: serde_json::json!({ "pledge_ids": pledge_ids }),
                },
            )
            .await;

        Ok(true)
    }
}

/// Operator-editable default for [`handles::HOSTEL_INTIMATION`]; used until
/// someone writes an override blob at that handle.
fn default_hostel_intimation_template() -> RawTemplate {
    RawTemplate {
        subject: "Ref: {{pledgeId}} | Allocation {{allocId}}".to_string(),
        html_body: "<p>Allocation {{allocId}} of {{amount}} for student {{cmsId}} awaits hostel confirmation.</p>{{overflowNote}}".to_string(),
    }
}

fn default_donor_intermediate_template() -> RawTemplate {
    RawTemplate {
        subject: "Your gift is being allocated".to_string(),
        html_body: "<p>Your gift is being allocated ({{refId}}): {{amount}} routed to a student in need.</p>".to_string(),
    }
}

fn default_batch_hostel_template() -> RawTemplate {
    RawTemplate {
        subject: "Ref: {{batchId}} | Batch allocation".to_string(),
        html_body: "<p>Batch {{batchId}}</p><table>{{rows}}</table>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn donor_intermediate_template_substitutes_amount_and_ref() {
        let tpl = default_donor_intermediate_template();
        let mut values = HashMap::new();
        values.insert("refId".to_string(), "ALLOC-1".to_string());
        values.insert("amount".to_string(), "5000".to_string());
        let rendered = TemplateRenderer::render(&tpl, &values).unwrap();
        assert!(rendered.html_body.contains("5000"));
        assert!(rendered.html_body.contains("ALLOC-1"));
    }
}
