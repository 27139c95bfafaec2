// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

mod reporting;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{Error, Result};
use crate::models::{Allocation, Beneficiary, Installment, Pledge, Receipt, Subscription};

/// Thin typed layer over Postgres (§4.1). Every read returns already-decoded
/// domain structs; every write that must be atomic with others (the
/// allocation critical section, §4.8.1) takes or returns a
/// `Transaction<'_, Postgres>` so the caller controls the commit point,
/// mirroring the teacher's `TapManager` holding a bare `PgPool` and issuing
/// one `sqlx::query!` per unit of work.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    // ---- Pledge ---------------------------------------------------------

    pub async fn get_pledge(&self, pledge_id: &str) -> Result<Option<Pledge>> {
        let row = sqlx::query_as!(
            Pledge,
            r#"
                SELECT
                    pledge_id, donor_email, donor_display_name, chapter, affiliation,
                    zakat, duration_code, committed_amount,
                    status AS "status: _",
                    submitted_at, confirmation_message_id, receipt_message_id,
                    verified_total, cash_balance, outstanding
                FROM pledges WHERE pledge_id = $1
            "#,
            pledge_id
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_pledge(&self, pledge: &Pledge) -> Result<()> {
        sqlx::query!(
            r#"
                INSERT INTO pledges
                    (pledge_id, donor_email, donor_display_name, chapter, affiliation, zakat,
                     duration_code, committed_amount, status, submitted_at,
                     confirmation_message_id, receipt_message_id, verified_total,
                     cash_balance, outstanding)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
            pledge.pledge_id,
            pledge.donor_email,
            pledge.donor_display_name,
            pledge.chapter,
            pledge.affiliation,
            pledge.zakat,
            pledge.duration_code,
            pledge.committed_amount,
            pledge.status as _,
            pledge.submitted_at,
            pledge.confirmation_message_id,
            pledge.receipt_message_id,
            pledge.verified_total,
            pledge.cash_balance,
            pledge.outstanding,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applies a new verified total and recomputed balances atomically with
    /// a status transition (§4.9 step 6, §4.7). Called by the Receipt
    /// Processor after appending the receipt itself. `receipt_message_id`
    /// is the inbound message that carried this receipt; it's only ever
    /// written once (`COALESCE`), so it threads back to the *first* receipt
    /// for later donor-notification threading (§4.8.1 step 10), not the
    /// latest one.
    pub async fn update_pledge_after_receipt(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        pledge_id: &str,
        verified_total: i64,
        cash_balance: i64,
        outstanding: i64,
        status: crate::models::PledgeState,
        receipt_message_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query!(
            r#"
                UPDATE pledges
                SET verified_total = $2, cash_balance = $3, outstanding = $4, status = $5,
                    receipt_message_id = COALESCE(receipt_message_id, $6)
                WHERE pledge_id = $1
            "#,
            pledge_id,
            verified_total,
            cash_balance,
            outstanding,
            status as _,
            receipt_message_id,
        )
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn set_pledge_status(&self, tx: &mut Transaction<'_, Postgres>, pledge_id: &str, status: crate::models::PledgeState) -> Result<()> {
        sqlx::query!(
            "UPDATE pledges SET status = $2 WHERE pledge_id = $1",
            pledge_id,
            status as _,
        )
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn set_pledge_cash_balance(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        pledge_id: &str,
        cash_balance: i64,
    ) -> Result<()> {
        sqlx::query!(
            "UPDATE pledges SET cash_balance = $2 WHERE pledge_id = $1",
            pledge_id,
            cash_balance,
        )
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Stamps the confirmation email's message-id onto a freshly created
    /// pledge so later threads (e.g. a subscription welcome mail) can reply
    /// into the same conversation.
    pub async fn set_pledge_confirmation_message_id(&self, pledge_id: &str, message_id: &str) -> Result<()> {
        sqlx::query!(
            "UPDATE pledges SET confirmation_message_id = $2 WHERE pledge_id = $1",
            pledge_id,
            message_id,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count of pledges on file, used to assign the next 1-based row number
    /// in `IdGenerator::pledge_id` (§6 inbound form event).
    pub async fn count_pledges(&self) -> Result<i64> {
        let count = sqlx::query_scalar!(r#"SELECT COUNT(*) AS "count!" FROM pledges"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ---- Receipt ----------------------------------------------------------

    pub async fn insert_receipt(&self, tx: &mut Transaction<'_, Postgres>, receipt: &Receipt) -> Result<()> {
        sqlx::query!(
            r#"
                INSERT INTO receipts
                    (receipt_id, pledge_id, processed_at, email_date, transfer_date,
                     amount_declared, amount_verified, confidence, stored_file_handle,
                     original_filename, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
            receipt.receipt_id,
            receipt.pledge_id,
            receipt.processed_at,
            receipt.email_date,
            receipt.transfer_date,
            receipt.amount_declared,
            receipt.amount_verified,
            receipt.confidence as _,
            receipt.stored_file_handle,
            receipt.original_filename,
            receipt.status as _,
        )
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Count of receipts already on file for a pledge, used to assign the
    /// next 1-based receipt ordinal (§4.9 step 9, `IdGenerator::receipt_id`).
    pub async fn count_receipts_for_pledge(&self, pledge_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar!(
            r#"SELECT COUNT(*) AS "count!" FROM receipts WHERE pledge_id = $1"#,
            pledge_id
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Verified receipts carrying a stored file, for attaching to the
    /// hostel intimation email (§4.8.1 step 7).
    pub async fn list_verified_receipts_for_pledge(&self, pledge_id: &str) -> Result<Vec<Receipt>> {
        let rows = sqlx::query_as!(
            Receipt,
            r#"
                SELECT
                    receipt_id, pledge_id, processed_at, email_date, transfer_date,
                    amount_declared, amount_verified, confidence AS "confidence: _",
                    stored_file_handle, original_filename, status AS "status: _"
                FROM receipts
                WHERE pledge_id = $1 AND status = 'VALID' AND stored_file_handle IS NOT NULL
                ORDER BY processed_at ASC
            "#,
            pledge_id
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn sum_verified_receipts(&self, pledge_id: &str) -> Result<i64> {
        let sum = sqlx::query_scalar!(
            r#"
                SELECT COALESCE(SUM(amount_verified), 0)::bigint AS "sum!"
                FROM receipts WHERE pledge_id = $1 AND status = 'VALID'
            "#,
            pledge_id
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    // ---- Allocation -------------------------------------------------------

    pub async fn sum_allocations_for_pledge(&self, pledge_id: &str) -> Result<i64> {
        let sum = sqlx::query_scalar!(
            r#"SELECT COALESCE(SUM(amount), 0)::bigint AS "sum!" FROM allocations WHERE pledge_id = $1"#,
            pledge_id
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    pub async fn sum_allocations_for_beneficiary(&self, cms_id: &str) -> Result<i64> {
        let sum = sqlx::query_scalar!(
            r#"SELECT COALESCE(SUM(amount), 0)::bigint AS "sum!" FROM allocations WHERE cms_id = $1"#,
            cms_id
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    /// Appended inside the critical section, after the hostel email has
    /// already been sent (§4.8.1 step 8) — the commit-last property means
    /// this call is the one irreversible step; everything before it can be
    /// retried, nothing after it needs to be.
    pub async fn insert_allocation(&self, tx: &mut Transaction<'_, Postgres>, alloc: &Allocation) -> Result<()> {
        sqlx::query!(
            r#"
                INSERT INTO allocations
                    (alloc_id, cms_id, pledge_id, verified_total_at_time_of_commit, amount,
                     created_at, status, hostel_intimation_message_id, hostel_intimation_date,
                     donor_alloc_message_id, donor_alloc_date, hostel_reply_message_id,
                     hostel_reply_date, donor_notify_message_id, donor_notify_date,
                     batch_id, installment_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
            alloc.alloc_id,
            alloc.cms_id,
            alloc.pledge_id,
            alloc.verified_total_at_time_of_commit,
            alloc.amount,
            alloc.created_at,
            alloc.status as _,
            alloc.hostel_intimation_message_id,
            alloc.hostel_intimation_date,
            alloc.donor_alloc_message_id,
            alloc.donor_alloc_date,
            alloc.hostel_reply_message_id,
            alloc.hostel_reply_date,
            alloc.donor_notify_message_id,
            alloc.donor_notify_date,
            alloc.batch_id,
            alloc.installment_id,
        )
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get_allocation(&self, alloc_id: &str) -> Result<Option<Allocation>> {
        let row = sqlx::query_as!(
            Allocation,
            r#"
                SELECT
                    alloc_id, cms_id, pledge_id, verified_total_at_time_of_commit, amount,
                    created_at, status AS "status: _", hostel_intimation_message_id,
                    hostel_intimation_date, donor_alloc_message_id, donor_alloc_date,
                    hostel_reply_message_id, hostel_reply_date, donor_notify_message_id,
                    donor_notify_date, batch_id, installment_id
                FROM allocations WHERE alloc_id = $1
            "#,
            alloc_id
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_pending_hostel_allocations(&self) -> Result<Vec<Allocation>> {
        let rows = sqlx::query_as!(
            Allocation,
            r#"
                SELECT
                    alloc_id, cms_id, pledge_id, verified_total_at_time_of_commit, amount,
                    created_at, status AS "status: _", hostel_intimation_message_id,
                    hostel_intimation_date, donor_alloc_message_id, donor_alloc_date,
                    hostel_reply_message_id, hostel_reply_date, donor_notify_message_id,
                    donor_notify_date, batch_id, installment_id
                FROM allocations WHERE status = 'PENDING_HOSTEL'
                ORDER BY created_at ASC
            "#
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// §4.10 step 3: all `PENDING_HOSTEL` allocations carrying either
    /// `pledge_id` or `batch_id` equal to the id the Watchdog matched.
    pub async fn list_pending_hostel_allocations_for(&self, matched_id: &str) -> Result<Vec<Allocation>> {
        let rows = sqlx::query_as!(
            Allocation,
            r#"
                SELECT
                    alloc_id, cms_id, pledge_id, verified_total_at_time_of_commit, amount,
                    created_at, status AS "status: _", hostel_intimation_message_id,
                    hostel_intimation_date, donor_alloc_message_id, donor_alloc_date,
                    hostel_reply_message_id, hostel_reply_date, donor_notify_message_id,
                    donor_notify_date, batch_id, installment_id
                FROM allocations
                WHERE status = 'PENDING_HOSTEL' AND (pledge_id = $1 OR batch_id = $1)
                ORDER BY created_at ASC
            "#,
            matched_id
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every allocation ever issued against `pledge_id` (§4.10 step 6: "every
    /// one of its allocations is HOSTEL_VERIFIED" check).
    pub async fn list_allocations_for_pledge(&self, pledge_id: &str) -> Result<Vec<Allocation>> {
        let rows = sqlx::query_as!(
            Allocation,
            r#"
                SELECT
                    alloc_id, cms_id, pledge_id, verified_total_at_time_of_commit, amount,
                    created_at, status AS "status: _", hostel_intimation_message_id,
                    hostel_intimation_date, donor_alloc_message_id, donor_alloc_date,
                    hostel_reply_message_id, hostel_reply_date, donor_notify_message_id,
                    donor_notify_date, batch_id, installment_id
                FROM allocations WHERE pledge_id = $1
                ORDER BY created_at ASC
            "#,
            pledge_id
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn record_donor_notification(&self, alloc_id: &str, message_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query!(
            r#"
                UPDATE allocations
                SET donor_notify_message_id = $2, donor_notify_date = $3
                WHERE alloc_id = $1
            "#,
            alloc_id,
            message_id,
            at,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_allocation_status(
        &self,
        alloc_id: &str,
        status: crate::models::AllocState,
    ) -> Result<()> {
        sqlx::query!(
            "UPDATE allocations SET status = $2 WHERE alloc_id = $1",
            alloc_id,
            status as _,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_hostel_reply(
        &self,
        alloc_id: &str,
        message_id: &str,
        at: DateTime<Utc>,
        status: crate::models::AllocState,
    ) -> Result<()> {
        sqlx::query!(
            r#"
                UPDATE allocations
                SET hostel_reply_message_id = $2, hostel_reply_date = $3, status = $4
                WHERE alloc_id = $1
            "#,
            alloc_id,
            message_id,
            at,
            status as _,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- Beneficiary --------------------------------------------------------

    pub async fn get_beneficiary(&self, cms_id: &str) -> Result<Option<Beneficiary>> {
        let row = sqlx::query_as!(
            Beneficiary,
            r#"
                SELECT cms_id, name, gender, school, degree, total_due, amount_cleared,
                       pending_amount, status AS "status: _"
                FROM beneficiaries WHERE cms_id = $1
            "#,
            cms_id
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// §4.8.1 step 6: `None` here means the beneficiary is unknown to the
    /// CMS, distinct from a known beneficiary with zero remaining need.
    pub async fn get_real_time_student_need(&self, cms_id: &str) -> Result<Option<i64>> {
        let row = self.get_beneficiary(cms_id).await?;
        Ok(row.map(|b| b.pending_amount))
    }

    pub async fn resync_beneficiary(&self, tx: &mut Transaction<'_, Postgres>, cms_id: &str) -> Result<()> {
        let cleared = sqlx::query_scalar!(
            r#"SELECT COALESCE(SUM(amount), 0)::bigint AS "sum!" FROM allocations WHERE cms_id = $1"#,
            cms_id
        )
        .fetch_one(&mut **tx)
        .await?;

        let total_due = sqlx::query_scalar!("SELECT total_due FROM beneficiaries WHERE cms_id = $1", cms_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| Error::UnknownStudent(cms_id.to_string()))?;

        let pending = (total_due - cleared).max(0);
        let status = crate::models::StudentState::from_amounts(total_due, cleared);

        sqlx::query!(
            r#"
                UPDATE beneficiaries
                SET amount_cleared = $2, pending_amount = $3, status = $4
                WHERE cms_id = $1
            "#,
            cms_id,
            cleared,
            pending,
            status as _,
        )
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    // ---- Subscription / Installment -----------------------------------------

    pub async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query_as!(
            Subscription,
            r#"
                SELECT
                    subscription_id, donor_email, donor_display_name, monthly_amount,
                    duration_months, start_date, next_due_date, payments_received,
                    amount_received, last_reminder_date, last_receipt_date,
                    status AS "status: _", welcome_message_id, completion_message_id,
                    linked_student_ids, created_at
                FROM subscriptions WHERE subscription_id = $1
            "#,
            subscription_id
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_subscription(&self, sub: &Subscription) -> Result<()> {
        sqlx::query!(
            r#"
                INSERT INTO subscriptions
                    (subscription_id, donor_email, donor_display_name, monthly_amount,
                     duration_months, start_date, next_due_date, payments_received,
                     amount_received, last_reminder_date, last_receipt_date, status,
                     welcome_message_id, completion_message_id, linked_student_ids, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
            sub.subscription_id,
            sub.donor_email,
            sub.donor_display_name,
            sub.monthly_amount,
            sub.duration_months,
            sub.start_date,
            sub.next_due_date,
            sub.payments_received,
            sub.amount_received,
            sub.last_reminder_date,
            sub.last_receipt_date,
            sub.status as _,
            sub.welcome_message_id,
            sub.completion_message_id,
            sub.linked_student_ids,
            sub.created_at,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_subscription(&self, sub: &Subscription) -> Result<()> {
        sqlx::query!(
            r#"
                UPDATE subscriptions SET
                    next_due_date = $2, payments_received = $3, amount_received = $4,
                    last_reminder_date = $5, last_receipt_date = $6, status = $7,
                    completion_message_id = $8
                WHERE subscription_id = $1
            "#,
            sub.subscription_id,
            sub.next_due_date,
            sub.payments_received,
            sub.amount_received,
            sub.last_reminder_date,
            sub.last_receipt_date,
            sub.status as _,
            sub.completion_message_id,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_installment(&self, installment: &Installment) -> Result<()> {
        sqlx::query!(
            r#"
                INSERT INTO installments
                    (installment_id, subscription_id, month_number, due_date, status,
                     receipt_id, amount_received, received_date, reminder_count,
                     last_reminder_date, reminder_email_id, receipt_confirm_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
            installment.installment_id,
            installment.subscription_id,
            installment.month_number,
            installment.due_date,
            installment.status as _,
            installment.receipt_id,
            installment.amount_received,
            installment.received_date,
            installment.reminder_count,
            installment.last_reminder_date,
            installment.reminder_email_id,
            installment.receipt_confirm_id,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_installments(&self, subscription_id: &str) -> Result<Vec<Installment>> {
        let rows = sqlx::query_as!(
            Installment,
            r#"
                SELECT
                    installment_id, subscription_id, month_number, due_date,
                    status AS "status: _", receipt_id, amount_received, received_date,
                    reminder_count, last_reminder_date, reminder_email_id, receipt_confirm_id
                FROM installments WHERE subscription_id = $1 ORDER BY month_number ASC
            "#,
            subscription_id
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn next_open_installment(&self, subscription_id: &str) -> Result<Option<Installment>> {
        let row = sqlx::query_as!(
            Installment,
            r#"
                SELECT
                    installment_id, subscription_id, month_number, due_date,
                    status AS "status: _", receipt_id, amount_received, received_date,
                    reminder_count, last_reminder_date, reminder_email_id, receipt_confirm_id
                FROM installments
                WHERE subscription_id = $1 AND status IN ('PENDING', 'REMINDED')
                ORDER BY month_number ASC
                LIMIT 1
            "#,
            subscription_id
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Payment recorded against this installment (§4.11 `record_subscription_payment`).
    pub async fn mark_installment_received(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        installment_id: &str,
        receipt_id: &str,
        amount_received: i64,
        received_date: NaiveDate,
    ) -> Result<()> {
        sqlx::query!(
            r#"
                UPDATE installments
                SET status = 'RECEIVED', receipt_id = $2, amount_received = $3, received_date = $4
                WHERE installment_id = $1
            "#,
            installment_id,
            receipt_id,
            amount_received,
            received_date,
        )
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// The installment's payment has been folded into a monthly allocation
    /// batch (§4.11 "Monthly allocation batch"): tags it with the
    /// triggering allocation batch's installment reference.
    pub async fn mark_installment_allocated(&self, installment_id: &str) -> Result<()> {
        sqlx::query!("UPDATE installments SET status = 'ALLOCATED' WHERE installment_id = $1", installment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_installment_reminded(&self, installment_id: &str, at: NaiveDate, message_id: &str) -> Result<()> {
        sqlx::query!(
            r#"
                UPDATE installments
                SET status = 'REMINDED', reminder_count = reminder_count + 1,
                    last_reminder_date = $2, reminder_email_id = $3
                WHERE installment_id = $1
            "#,
            installment_id,
            at,
            message_id,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_installment_missed(&self, installment_id: &str) -> Result<()> {
        sqlx::query!("UPDATE installments SET status = 'MISSED' WHERE installment_id = $1", installment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Subscriptions the daily sweep and monthly batch still need to visit:
    /// anything not already in a terminal state.
    pub async fn list_active_subscription_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar!(
            r#"
                SELECT subscription_id FROM subscriptions
                WHERE status NOT IN ('COMPLETED', 'CANCELLED')
            "#
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
