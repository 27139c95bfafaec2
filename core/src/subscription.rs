// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! §4.11: subscription creation, the daily reminder/lapse sweep, payment
//! recording, and the monthly allocation batch trigger.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use pledger_common::audit::{AuditEntry, AuditKind, AuditLog};
use pledger_common::blob::BlobStore;
use pledger_common::clock::Clock;
use pledger_common::config::Config;
use pledger_common::error::{Error, Result};
use pledger_common::ids::IdGenerator;
use pledger_common::lock::NamedLock;
use pledger_common::mail::MailGateway;
use pledger_common::models::{Installment, InstState, PledgeState, Receipt, ReceiptConfidence, ReceiptStatus, SubState, Subscription};
use pledger_common::store::Store;
use pledger_common::template::{fetch_or_default, handles, RawTemplate, TemplateRenderer};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::allocation::{AllocationService, StudentTarget};
use crate::fsm;

const LOCK_WAIT: Duration = Duration::from_secs(30);

pub struct SubscriptionEngine<L: NamedLock + Clone> {
    store: Store,
    mail: Arc<dyn MailGateway>,
    blobs: Arc<dyn BlobStore>,
    audit: AuditLog,
    ids: IdGenerator,
    clock: Arc<dyn Clock>,
    lock: L,
    config: Config,
}

impl<L: NamedLock + Clone + 'static> SubscriptionEngine<L> {
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

    /// Creates the subscription row plus exactly `duration_months`
    /// installment rows, and sends the welcome email (§4.11 "Create").
    pub async fn create_subscription(
        &self,
        pledge_id: &str,
        donor_email: &str,
        donor_display_name: &str,
        monthly_amount: i64,
        duration_months: i32,
        linked_student_ids: &str,
    ) -> Result<Subscription> {
        let now = self.clock.now();
        let start_date = first_of_month(now.date_naive());

        let welcome_template = fetch_or_default(self.blobs.as_ref(), handles::SUBSCRIPTION_WELCOME, default_welcome_template()).await;
        let mut welcome_values = HashMap::new();
        welcome_values.insert("donorDisplayName".to_string(), donor_display_name.to_string());
        welcome_values.insert("monthlyAmount".to_string(), monthly_amount.to_string());
        welcome_values.insert("durationMonths".to_string(), duration_months.to_string());
        welcome_values.insert("startDate".to_string(), start_date.to_string());
        let welcome_rendered = TemplateRenderer::render(&welcome_template, &welcome_values)?;
        let welcome_message_id = self
            .mail
            .send(
                &[donor_email.to_string()],
                &[],
                &format!("Ref: {pledge_id}"),
                &welcome_rendered.html_body,
                &[],
            )
            .await?;
        self.store
            .set_pledge_confirmation_message_id(pledge_id, &welcome_message_id.0)
            .await?;

        let subscription = Subscription {
            subscription_id: pledge_id.to_string(),
            donor_email: donor_email.to_string(),
            donor_display_name: donor_display_name.to_string(),
            monthly_amount,
            duration_months,
            start_date,
            next_due_date: start_date,
            payments_received: 0,
            amount_received: 0,
            last_reminder_date: None,
            last_receipt_date: None,
            status: SubState::Active,
            welcome_message_id: Some(welcome_message_id.0.clone()),
            completion_message_id: None,
            linked_student_ids: linked_student_ids.to_string(),
            created_at: now,
        };
        self.store.insert_subscription(&subscription).await?;

        for month_number in 1..=duration_months {
            let due_date = add_months_clamped(start_date, month_number - 1);
            let installment = Installment {
                installment_id: self.ids.installment_id(pledge_id, month_number as u32),
                subscription_id: pledge_id.to_string(),
                month_number,
                due_date,
                status: InstState::Pending,
                receipt_id: None,
                amount_received: 0,
                received_date: None,
                reminder_count: 0,
                last_reminder_date: None,
                reminder_email_id: None,
                receipt_confirm_id: None,
            };
            self.store.insert_installment(&installment).await?;
        }

        self.audit
            .record(
                now,
                AuditEntry {
                    actor: "subscription-engine".to_string(),
                    kind: AuditKind::SubscriptionCreated,
                    target_id: pledge_id.to_string(),
                    action: "create_subscription".to_string(),
                    before: None,
                    after: serde_json::to_value(&subscription).ok(),
                    metadata: serde_json::json!({ "duration_months": duration_months }),
                },
            )
            .await;

        Ok(subscription)
    }

    /// §4.11 daily sweep: reminders, then overdue/lapsed transitions.
    pub async fn run_daily_sweep(&self, subscription_ids: &[String]) -> Result<()> {
        for subscription_id in subscription_ids {
            if let Err(e) = self.sweep_one(subscription_id).await {
                warn!(error = %e, subscription_id, "daily sweep failed for subscription");
            }
        }
        Ok(())
    }

    async fn sweep_one(&self, subscription_id: &str) -> Result<()> {
        let Some(mut subscription) = self.store.get_subscription(subscription_id).await? else {
            return Ok(());
        };
        let installments = self.store.list_installments(subscription_id).await?;
        let today = self.clock.now().date_naive();

        let mut max_days_overdue = 0i64;
        for installment in &installments {
            if installment.status == InstState::Allocated || installment.status == InstState::Received {
                continue;
            }
            let days_since_due = (today - installment.due_date).num_days();
            if days_since_due < 0 {
                continue;
            }
            max_days_overdue = max_days_overdue.max(days_since_due);

            if days_since_due >= self.config.lapsed_threshold_days.max(30) && installment.status != InstState::Missed {
                self.store.mark_installment_missed(&installment.installment_id).await?;
                continue;
            }

            if installment.reminder_count < self.config.max_reminders && self.config.reminder_days.contains(&days_since_due)
            {
                self.send_reminder(&subscription, installment, days_since_due).await?;
            }
        }

        let new_status = if max_days_overdue >= self.config.lapsed_threshold_days {
            SubState::Lapsed
        } else if max_days_overdue >= self.config.overdue_threshold_days {
            SubState::Overdue
        } else {
            SubState::Active
        };

        if matches!(subscription.status, SubState::Active | SubState::Overdue | SubState::Lapsed)
            && new_status != subscription.status
        {
            fsm::subscription_transition(subscription_id, subscription.status, new_status)?;
            subscription.status = new_status;
            self.store.update_subscription(&subscription).await?;
            let kind = if new_status == SubState::Lapsed {
                AuditKind::SubscriptionLapsed
            } else {
                AuditKind::StatusChange
            };
            self.audit
                .record(
                    self.clock.now(),
                    AuditEntry {
                        actor: "subscription-engine".to_string(),
                        kind,
                        target_id: subscription_id.to_string(),
                        action: "daily_sweep_status_transition".to_string(),
                        before: None,
                        after: serde_json::json!({ "status": format!("{new_status:?}") }).into(),
                        metadata: serde_json::json!({ "max_days_overdue": max_days_overdue }),
                    },
                )
                .await;
        }

        Ok(())
    }

    async fn send_reminder(&self, subscription: &Subscription, installment: &Installment, days_since_due: i64) -> Result<()> {
        let subject = format!("Ref: {} | Installment reminder", subscription.subscription_id);
        let mut values = HashMap::new();
        values.insert("monthlyAmount".to_string(), subscription.monthly_amount.to_string());
        values.insert("daysSinceDue".to_string(), days_since_due.to_string());
        let template = if days_since_due == 0 {
            fetch_or_default(self.blobs.as_ref(), handles::INSTALLMENT_REMINDER_DUE, default_reminder_due_template()).await
        } else {
            fetch_or_default(
                self.blobs.as_ref(),
                handles::INSTALLMENT_REMINDER_OVERDUE,
                default_reminder_overdue_template(),
            )
            .await
        };
        let rendered = TemplateRenderer::render(&template, &values)?;
        let message_id = self
            .mail
            .send(&[subscription.donor_email.clone()], &[], &subject, &rendered.html_body, &[])
            .await?;
        let today = self.clock.now().date_naive();
        self.store
            .mark_installment_reminded(&installment.installment_id, today, &message_id.0)
            .await?;
        self.audit
            .record(
                self.clock.now(),
                AuditEntry {
                    actor: "subscription-engine".to_string(),
                    kind: AuditKind::SubscriptionReminder,
                    target_id: installment.installment_id.clone(),
                    action: "send_reminder".to_string(),
                    before: None,
                    after: None,
                    metadata: serde_json::json!({ "days_since_due": days_since_due }),
                },
            )
            .await;
        Ok(())
    }

    /// `record_subscription_payment(subscription_id, blob_handle, amount)`
    /// (§4.9 step 4, §4.11): FIFO match against the oldest open installment,
    /// then post the same payment as a synthetic pledge Receipt so §4.7
    /// balance math stays unified across one-time and recurring donors.
    pub async fn record_subscription_payment(
        &self,
        subscription_id: &str,
        stored_file_handle: Option<String>,
        amount: i64,
    ) -> Result<()> {
        let subscription_id = subscription_id.to_string();
        self.lock
            .with_lock("alloc", LOCK_WAIT, move || {
                let this = self;
                Box::pin(async move { this.record_subscription_payment_locked(&subscription_id, stored_file_handle, amount).await })
            })
            .await
    }

    async fn record_subscription_payment_locked(
        &self,
        subscription_id: &str,
        stored_file_handle: Option<String>,
        amount: i64,
    ) -> Result<()> {
        let mut subscription = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| Error::NotFound(subscription_id.to_string()))?;

        let installment = self
            .store
            .next_open_installment(subscription_id)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("no open installment for {subscription_id}")))?;

        fsm::installment_transition(&installment.installment_id, installment.status, InstState::Received)?;

        let now = self.clock.now();
        let today = now.date_naive();

        let pledge = self
            .store
            .get_pledge(subscription_id)
            .await?
            .ok_or_else(|| Error::NotFound(subscription_id.to_string()))?;
        let receipt_id = format!("{subscription_id}-R{}", subscription.payments_received + 1);
        let receipt = Receipt {
            receipt_id: receipt_id.clone(),
            pledge_id: subscription_id.to_string(),
            processed_at: now,
            email_date: today,
            transfer_date: Some(today),
            amount_declared: amount,
            amount_verified: amount,
            confidence: ReceiptConfidence::Unknown,
            stored_file_handle,
            original_filename: None,
            status: ReceiptStatus::Valid,
        };

        let mut tx = self.store.begin().await?;
        self.store.insert_receipt(&mut tx, &receipt).await?;
        self.store
            .mark_installment_received(&mut tx, &installment.installment_id, &receipt_id, amount, today)
            .await?;

        let new_verified_total = pledge.verified_total + amount;
        let new_balance = new_verified_total - self.store.sum_allocations_for_pledge(subscription_id).await?;
        let new_outstanding = (pledge.committed_amount - new_verified_total).max(0);
        let new_pledge_status = if new_verified_total >= pledge.committed_amount {
            PledgeState::ProofSubmitted
        } else {
            PledgeState::PartialReceipt
        };
        fsm::pledge_transition(subscription_id, pledge.status, new_pledge_status)?;
        self.store
            .update_pledge_after_receipt(
                &mut tx,
                subscription_id,
                new_verified_total,
                new_balance,
                new_outstanding,
                new_pledge_status,
                None,
            )
            .await?;
        tx.commit().await?;

        subscription.payments_received += 1;
        subscription.amount_received += amount;
        subscription.last_receipt_date = Some(today);
        subscription.next_due_date = add_months_clamped(subscription.next_due_date, 1);
        if matches!(subscription.status, SubState::Overdue | SubState::Lapsed) {
            fsm::subscription_transition(subscription_id, subscription.status, SubState::Active)?;
            subscription.status = SubState::Active;
        }

        let mut completion_message_id = None;
        if subscription.payments_received >= subscription.duration_months {
            fsm::subscription_transition(subscription_id, subscription.status, SubState::Completed)?;
            subscription.status = SubState::Completed;
            let completion_template =
                fetch_or_default(self.blobs.as_ref(), handles::SUBSCRIPTION_COMPLETION, default_completion_template()).await;
            let mut completion_values = HashMap::new();
            completion_values.insert("durationMonths".to_string(), subscription.duration_months.to_string());
            let completion_rendered = TemplateRenderer::render(&completion_template, &completion_values)?;
            let message_id = self
                .mail
                .send(
                    &[subscription.donor_email.clone()],
                    &[],
                    &format!("Ref: {subscription_id}"),
                    &completion_rendered.html_body,
                    &[],
                )
                .await?;
            completion_message_id = Some(message_id.0);
        }
        subscription.completion_message_id = completion_message_id;
        self.store.update_subscription(&subscription).await?;

        self.audit
            .record(
                now,
                AuditEntry {
                    actor: "subscription-engine".to_string(),
                    kind: AuditKind::SubscriptionPayment,
                    target_id: subscription_id.to_string(),
                    action: "record_subscription_payment".to_string(),
                    before: None,
                    after: serde_json::json!({ "amount": amount, "installment_id": installment.installment_id }).into(),
                    metadata: serde_json::json!({}),
                },
            )
            .await;

        if subscription.status == SubState::Completed {
            self.audit
                .record(
                    now,
                    AuditEntry {
                        actor: "subscription-engine".to_string(),
                        kind: AuditKind::SubscriptionCompleted,
                        target_id: subscription_id.to_string(),
                        action: "subscription_completed".to_string(),
                        before: None,
                        after: None,
                        metadata: serde_json::json!({}),
                    },
                )
                .await;
        }

        info!(subscription_id, amount, "subscription payment recorded");
        Ok(())
    }

    /// §4.11 monthly allocation batch: group this month's RECEIVED
    /// installments by subscription and hand each group to batch
    /// allocation with its linked student list.
    pub async fn run_monthly_batch(
        &self,
        subscription_ids: &[String],
        allocation_service: &AllocationService<L>,
    ) -> Result<()> {
        let now = self.clock.now();
        if now.day() != self.config.batch_intimation_day {
            return Ok(());
        }

        for subscription_id in subscription_ids {
            let Some(subscription) = self.store.get_subscription(subscription_id).await? else {
                continue;
            };
            let students = subscription.linked_student_id_list();
            if students.is_empty() {
                self.audit
                    .record(
                        now,
                        AuditEntry {
                            actor: "subscription-engine".to_string(),
                            kind: AuditKind::Alert,
                            target_id: subscription_id.clone(),
                            action: "monthly_batch_no_linked_students".to_string(),
                            before: None,
                            after: None,
                            metadata: serde_json::json!({}),
                        },
                    )
                    .await;
                continue;
            }

            let installments = self.store.list_installments(subscription_id).await?;
            let this_month_received: Vec<&Installment> = installments
                .iter()
                .filter(|i| {
                    i.status == InstState::Received
                        && i.received_date
                            .map(|d| d.year() == now.year() && d.month() == now.month())
                            .unwrap_or(false)
                })
                .collect();
            if this_month_received.is_empty() {
                continue;
            }

            let targets: Vec<StudentTarget> = students
                .iter()
                .map(|cms_id| StudentTarget {
                    cms_id: cms_id.to_string(),
                    amount: if students.len() == 1 {
                        Some(self.config.subscription_default_student_amount)
                    } else {
                        None
                    },
                })
                .collect();

            let installment_tag = this_month_received[0].installment_id.clone();
            allocation_service
                .process_batch_allocation_tagged(&[subscription_id.clone()], &targets, Some(installment_tag))
                .await?;

            for installment in this_month_received {
                self.store.mark_installment_allocated(&installment.installment_id).await?;
            }
        }
        Ok(())
    }
}

fn default_welcome_template() -> RawTemplate {
    RawTemplate {
        subject: "Welcome to your recurring gift".to_string(),
        html_body: "<p>Thank you {{donorDisplayName}}. Your recurring gift of {{monthlyAmount}} for \
             {{durationMonths}} months begins {{startDate}}.</p>"
            .to_string(),
    }
}

fn default_reminder_due_template() -> RawTemplate {
    RawTemplate {
        subject: "Installment due today".to_string(),
        html_body: "<p>Your installment of {{monthlyAmount}} is due today.</p>".to_string(),
    }
}

fn default_reminder_overdue_template() -> RawTemplate {
    RawTemplate {
        subject: "Installment overdue".to_string(),
        html_body: "<p>Your installment of {{monthlyAmount}} is now {{daysSinceDue}} days overdue.</p>".to_string(),
    }
}

fn default_completion_template() -> RawTemplate {
    RawTemplate {
        subject: "Commitment complete".to_string(),
        html_body: "<p>Your {{durationMonths}}-month commitment is complete. Thank you.</p>".to_string(),
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

fn add_months_clamped(date: NaiveDate, months: i32) -> NaiveDate {
    let total_months = date.year() * 12 + date.month() as i32 - 1 + months;
    let year = total_months.div_euclid(12);
    let month = total_months.rem_euclid(12) + 1;
    NaiveDate::from_ymd_opt(year, month as u32, 1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_months_clamped_rolls_year() {
        let d = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        assert_eq!(add_months_clamped(d, 2), NaiveDate::from_ymd_opt(2027, 1, 1).unwrap());
    }

    #[test]
    fn first_of_month_clamps_to_day_one() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 17).unwrap();
        assert_eq!(first_of_month(d), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    }
}
