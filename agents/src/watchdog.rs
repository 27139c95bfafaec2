// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! §4.10: the every-15-minute scan of hostel/UAO reply threads. Unlike the
//! Receipt Processor, a confirmed reply can close out a pledge, so the
//! per-pledge status flip at the end of step 6 runs under the same named
//! lock as the rest of the allocation-affecting writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pledger_common::ai::{AiOracle, ReplyStatus};
use pledger_common::audit::{AiAuditLog, AuditEntry, AuditKind, AuditLog};
use pledger_common::blob::BlobStore;
use pledger_common::clock::Clock;
use pledger_common::config::Config;
use pledger_common::error::Result;
use pledger_common::mail::{thread_context, MailGateway, MessageId, Thread};
use pledger_common::models::{AllocState, PledgeState};
use pledger_common::store::Store;
use pledger_common::template::{fetch_or_default, handles, RawTemplate, TemplateRenderer};
use tracing::{info, warn};

use crate::refs;

pub const LABEL_WATCHDOG_INBOX: &str = "Watchdog/Inbox";
pub const LABEL_PROCESSED: &str = "Watchdog/Processed";
pub const LABEL_MANUAL_REVIEW: &str = "Watchdog/Manual-Review";

const MAX_HISTORY: usize = 5;

pub struct Watchdog {
    store: Store,
    mail: Arc<dyn MailGateway>,
    blobs: Arc<dyn BlobStore>,
    ai: Arc<dyn AiOracle>,
    ai_audit: AiAuditLog,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl Watchdog {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        mail: Arc<dyn MailGateway>,
        blobs: Arc<dyn BlobStore>,
        ai: Arc<dyn AiOracle>,
        ai_audit: AiAuditLog,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            store,
            mail,
            blobs,
            ai,
            ai_audit,
            audit,
            clock,
            config,
        }
    }

    pub async fn run_once(&self) -> Result<()> {
        let thread_id_map = self.build_thread_id_map().await?;
        let threads = self.mail.threads_with_label(LABEL_WATCHDOG_INBOX).await?;
        info!(count = threads.len(), "watchdog scanning threads");
        for thread in threads {
            if let Err(e) = self.process_thread(&thread, &thread_id_map).await {
                warn!(error = %e, thread_id = %thread.thread_id, "watchdog failed on thread, will retry next tick");
            }
        }
        Ok(())
    }

    /// Step 1: `{stored hostel-intimation-id -> pledgeId/batchId}`, both
    /// cleaned and raw message-id forms.
    async fn build_thread_id_map(&self) -> Result<HashMap<String, String>> {
        let pending = self.store.list_pending_hostel_allocations().await?;
        let mut map = HashMap::new();
        for alloc in &pending {
            let Some(raw_id) = &alloc.hostel_intimation_message_id else {
                continue;
            };
            let target = alloc.batch_id.clone().unwrap_or_else(|| alloc.pledge_id.clone());
            map.insert(MessageId(raw_id.clone()).cleaned(), target.clone());
            map.insert(raw_id.clone(), target);
        }
        Ok(map)
    }

    fn match_thread_id(thread: &Thread, map: &HashMap<String, String>) -> Option<String> {
        thread.messages.iter().find_map(|m| {
            map.get(&m.id.cleaned())
                .or_else(|| map.get(&m.id.0))
                .cloned()
        })
    }

    fn combined_text(thread: &Thread) -> String {
        thread
            .messages
            .iter()
            .map(|m| format!("{}\n{}", m.subject, m.body))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn process_thread(&self, thread: &Thread, thread_id_map: &HashMap<String, String>) -> Result<()> {
        let matched_id = Self::match_thread_id(thread, thread_id_map)
            .or_else(|| refs::last_pledge_or_batch_id(&Self::combined_text(thread)));

        let Some(matched_id) = matched_id else {
            info!(thread_id = %thread.thread_id, "watchdog could not resolve a pledge/batch reference, retrying next tick");
            return Ok(());
        };

        let open_allocations = self.store.list_pending_hostel_allocations_for(&matched_id).await?;
        if open_allocations.is_empty() {
            self.mail.add_label(&thread.thread_id, LABEL_PROCESSED).await?;
            self.mail.remove_label(&thread.thread_id, LABEL_WATCHDOG_INBOX).await?;
            return Ok(());
        }
        let open_alloc_ids: Vec<String> = open_allocations.iter().map(|a| a.alloc_id.clone()).collect();

        let ctx = thread_context(thread, MAX_HISTORY);
        let analysis = self.ai.classify_reply(&ctx.combined, &open_alloc_ids).await;

        let now = self.clock.now();
        self.ai_audit
            .record(
                now,
                "classify_reply",
                &matched_id,
                analysis.is_some(),
                analysis.as_ref().and_then(|a| serde_json::to_string(a).ok()).as_deref(),
            )
            .await;

        let Some(analysis) = analysis else {
            warn!(matched_id, thread_id = %thread.thread_id, "AI oracle returned nothing, retrying next tick");
            return Ok(());
        };

        match analysis.status {
            ReplyStatus::ConfirmedAll | ReplyStatus::Partial => {
                self.confirm_allocations(thread, &analysis.confirmed_alloc_ids, now).await?;
            }
            ReplyStatus::Ambiguous | ReplyStatus::Query => {
                self.raise_query(thread, &open_alloc_ids, now).await?;
            }
        }

        self.mail.add_label(&thread.thread_id, LABEL_PROCESSED).await?;
        self.mail.remove_label(&thread.thread_id, LABEL_WATCHDOG_INBOX).await?;
        Ok(())
    }

    async fn confirm_allocations(
        &self,
        thread: &Thread,
        confirmed_alloc_ids: &[String],
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let Some(latest) = thread.messages.iter().max_by_key(|m| m.sent_at) else {
            return Ok(());
        };

        let mut touched_pledges = std::collections::BTreeSet::new();
        for alloc_id in confirmed_alloc_ids {
            self.store
                .record_hostel_reply(alloc_id, &latest.id.0, now, AllocState::HostelVerified)
                .await?;
            self.audit
                .record(
                    now,
                    AuditEntry {
                        actor: "watchdog".to_string(),
                        kind: AuditKind::HostelVerification,
                        target_id: alloc_id.clone(),
                        action: "hostel_reply_confirmed".to_string(),
                        before: None,
                        after: None,
                        metadata: serde_json::json!({}),
                    },
                )
                .await;

            let Some(alloc) = self.store.get_allocation(alloc_id).await? else {
                continue;
            };
            touched_pledges.insert(alloc.pledge_id.clone());

            if let Some(pledge) = self.store.get_pledge(&alloc.pledge_id).await? {
                let template = fetch_or_default(self.blobs.as_ref(), handles::HOSTEL_VERIFIED_NOTICE, default_verified_notice_template()).await;
                let mut values = HashMap::new();
                values.insert("allocId".to_string(), alloc_id.clone());
                values.insert("amount".to_string(), alloc.amount.to_string());
                let rendered = TemplateRenderer::render(&template, &values)?;
                let body = rendered.html_body;
                let mut prior_ids = Vec::new();
                if let Some(id) = &alloc.donor_alloc_message_id {
                    prior_ids.push(MessageId(id.clone()));
                }
                if let Some(id) = &pledge.receipt_message_id {
                    prior_ids.push(MessageId(id.clone()));
                }
                match self
                    .mail
                    .send_or_reply(&pledge.donor_email, &format!("Ref: {}", alloc.pledge_id), &body, &prior_ids)
                    .await
                {
                    Ok(message_id) => {
                        self.store.record_donor_notification(alloc_id, &message_id.0, now).await?;
                    }
                    Err(e) => {
                        warn!(error = %e, alloc_id, "donor verification notification failed; continuing");
                    }
                }
            }
        }

        // §4.7: a fully-allocated pledge whose every allocation has cleared
        // hostel verification is done.
        for pledge_id in touched_pledges {
            let Some(pledge) = self.store.get_pledge(&pledge_id).await? else {
                continue;
            };
            if pledge.status != PledgeState::FullyAllocated {
                continue;
            }
            let allocations = self.store.list_allocations_for_pledge(&pledge_id).await?;
            let all_verified = !allocations.is_empty()
                && allocations.iter().all(|a| a.status == AllocState::HostelVerified);
            if !all_verified {
                continue;
            }

            let mut tx = self.store.begin().await?;
            self.store.set_pledge_status(&mut tx, &pledge_id, PledgeState::Closed).await?;
            tx.commit().await?;

            self.audit
                .record(
                    now,
                    AuditEntry {
                        actor: "watchdog".to_string(),
                        kind: AuditKind::StatusChange,
                        target_id: pledge_id.clone(),
                        action: "pledge_closed".to_string(),
                        before: Some(serde_json::json!({ "status": "FULLY_ALLOCATED" })),
                        after: Some(serde_json::json!({ "status": "CLOSED" })),
                        metadata: serde_json::json!({}),
                    },
                )
                .await;
            info!(pledge_id, "pledge closed: all allocations hostel-verified");
        }

        Ok(())
    }

    async fn raise_query(&self, thread: &Thread, open_alloc_ids: &[String], now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        self.mail.add_label(&thread.thread_id, LABEL_MANUAL_REVIEW).await?;

        for alloc_id in open_alloc_ids {
            self.store.update_allocation_status(alloc_id, AllocState::HostelQuery).await?;
            self.audit
                .record(
                    now,
                    AuditEntry {
                        actor: "watchdog".to_string(),
                        kind: AuditKind::HostelQuery,
                        target_id: alloc_id.clone(),
                        action: "hostel_reply_ambiguous".to_string(),
                        before: None,
                        after: None,
                        metadata: serde_json::json!({}),
                    },
                )
                .await;
        }

        let admin = self.config.leads_for_chapter("Other");
        if !admin.is_empty() {
            let template = fetch_or_default(self.blobs.as_ref(), handles::WATCHDOG_ALERT, default_watchdog_alert_template()).await;
            let mut values = HashMap::new();
            values.insert("openAllocIds".to_string(), format!("{open_alloc_ids:?}"));
            values.insert("threadId".to_string(), thread.thread_id.clone());
            let rendered = TemplateRenderer::render(&template, &values)?;
            let body = rendered.html_body;
            if let Err(e) = self
                .mail
                .send(admin, &[], "Watchdog: ambiguous hostel reply", &body, &[])
                .await
            {
                warn!(error = %e, "alert email to admin failed");
            }
        }

        self.audit
            .record(
                now,
                AuditEntry {
                    actor: "watchdog".to_string(),
                    kind: AuditKind::Alert,
                    target_id: thread.thread_id.clone(),
                    action: "ambiguous_hostel_reply".to_string(),
                    before: None,
                    after: None,
                    metadata: serde_json::json!({ "open_alloc_ids": open_alloc_ids }),
                },
            )
            .await;
        Ok(())
    }
}

fn default_verified_notice_template() -> RawTemplate {
    RawTemplate {
        subject: "Allocation confirmed".to_string(),
        html_body: "<p>Great news — the hostel has confirmed allocation {{allocId}} ({{amount}} PKR) against your pledge.</p>"
            .to_string(),
    }
}

fn default_watchdog_alert_template() -> RawTemplate {
    RawTemplate {
        subject: "Watchdog: ambiguous hostel reply".to_string(),
        html_body: "<p>Watchdog could not classify a hostel reply against allocations {{openAllocIds}}. Thread: {{threadId}}</p>"
            .to_string(),
    }
}

pub fn poll_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pledger_common::mail::Message;
    use chrono::Utc;

    fn msg(id: &str, subject: &str) -> Message {
        Message {
            id: MessageId(id.to_string()),
            from: "hostel@uao.edu.pk".into(),
            to: vec![],
            cc: vec![],
            subject: subject.to_string(),
            body: String::new(),
            sent_at: Utc::now(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn match_thread_id_prefers_map_over_subject() {
        let mut map = HashMap::new();
        map.insert("hostel-msg-1".to_string(), "PLEDGE-2026-9".to_string());
        let thread = Thread {
            thread_id: "t1".into(),
            messages: vec![msg("hostel-msg-1", "Re: Ref: PLEDGE-2026-1")],
        };
        assert_eq!(
            Watchdog::match_thread_id(&thread, &map).as_deref(),
            Some("PLEDGE-2026-9")
        );
    }

    #[test]
    fn falls_back_to_subject_when_unmapped() {
        let map = HashMap::new();
        let thread = Thread {
            thread_id: "t1".into(),
            messages: vec![msg("unrelated-id", "Re: Ref: PLEDGE-2026-3")],
        };
        assert!(Watchdog::match_thread_id(&thread, &map).is_none());
        assert_eq!(
            refs::last_pledge_or_batch_id(&Watchdog::combined_text(&thread)).as_deref(),
            Some("PLEDGE-2026-3")
        );
    }
}
