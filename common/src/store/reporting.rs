// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Aggregate-only queries backing the Sanitized Read API (§4.12). Every
//! query here selects sums, counts, and operational identifiers — never
//! `donor_email`/`donor_display_name` — so the API layer never has PII to
//! accidentally forward.

use crate::error::Result;
use crate::models::reporting::{
    ChapterBreakdown, CompositionSlice, EventRow, FlowPoint, PledgeTrack, StatusCount, Summary, TrackAllocation,
};

use super::Store;

impl Store {
    pub async fn reporting_summary(&self) -> Result<Summary> {
        let totals = sqlx::query!(
            r#"
                SELECT
                    COUNT(*) AS "pledge_count!",
                    COALESCE(SUM(committed_amount), 0)::bigint AS "total_committed!",
                    COALESCE(SUM(verified_total), 0)::bigint AS "total_verified!",
                    COALESCE(SUM(outstanding), 0)::bigint AS "total_outstanding!"
                FROM pledges
            "#
        )
        .fetch_one(&self.pool)
        .await?;

        let total_allocated = sqlx::query_scalar!(r#"SELECT COALESCE(SUM(amount), 0)::bigint AS "sum!" FROM allocations"#)
            .fetch_one(&self.pool)
            .await?;

        let by_status = sqlx::query!(
            r#"SELECT status AS "status!", COUNT(*) AS "count!" FROM pledges GROUP BY status ORDER BY status"#
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| StatusCount {
            status: r.status,
            count: r.count,
        })
        .collect();

        Ok(Summary {
            pledge_count: totals.pledge_count,
            total_committed: totals.total_committed,
            total_verified: totals.total_verified,
            total_allocated,
            total_outstanding: totals.total_outstanding,
            by_status,
        })
    }

    /// Daily totals over the trailing `days` days, oldest first.
    pub async fn reporting_flow(&self, days: i32) -> Result<Vec<FlowPoint>> {
        let rows = sqlx::query!(
            r#"
                SELECT
                    d::date AS "day!",
                    COALESCE((SELECT SUM(committed_amount) FROM pledges WHERE submitted_at::date = d), 0)::bigint AS "pledged_amount!",
                    COALESCE((SELECT SUM(amount_verified) FROM receipts WHERE processed_at::date = d AND status = 'VALID'), 0)::bigint AS "verified_amount!",
                    COALESCE((SELECT SUM(amount) FROM allocations WHERE created_at::date = d), 0)::bigint AS "allocated_amount!"
                FROM generate_series(CURRENT_DATE - ($1::int - 1), CURRENT_DATE, interval '1 day') AS d
                ORDER BY d
            "#,
            days
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| FlowPoint {
            day: r.day,
            pledged_amount: r.pledged_amount,
            verified_amount: r.verified_amount,
            allocated_amount: r.allocated_amount,
        })
        .collect();
        Ok(rows)
    }

    pub async fn reporting_chapters(&self) -> Result<Vec<ChapterBreakdown>> {
        // Two aggregates joined on chapter, rather than one query joining
        // pledges to allocations directly: a direct join fans a pledge out
        // once per allocation, which would inflate `committed_amount` and
        // `verified_amount` for any chapter with multi-allocation pledges.
        let rows = sqlx::query!(
            r#"
                WITH pledge_agg AS (
                    SELECT chapter, COUNT(*) AS pledge_count, SUM(committed_amount) AS committed_amount,
                           SUM(verified_total) AS verified_amount
                    FROM pledges
                    GROUP BY chapter
                ),
                alloc_agg AS (
                    SELECT p.chapter, SUM(a.amount) AS allocated_amount
                    FROM allocations a JOIN pledges p ON p.pledge_id = a.pledge_id
                    GROUP BY p.chapter
                )
                SELECT
                    pa.chapter AS "chapter!",
                    pa.pledge_count AS "pledge_count!",
                    COALESCE(pa.committed_amount, 0)::bigint AS "committed_amount!",
                    COALESCE(pa.verified_amount, 0)::bigint AS "verified_amount!",
                    COALESCE(aa.allocated_amount, 0)::bigint AS "allocated_amount!"
                FROM pledge_agg pa
                LEFT JOIN alloc_agg aa ON aa.chapter = pa.chapter
                ORDER BY pa.chapter
            "#
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| ChapterBreakdown {
            chapter: r.chapter,
            pledge_count: r.pledge_count,
            committed_amount: r.committed_amount,
            verified_amount: r.verified_amount,
            allocated_amount: r.allocated_amount,
        })
        .collect();
        Ok(rows)
    }

    pub async fn reporting_composition(&self) -> Result<Vec<CompositionSlice>> {
        let rows = sqlx::query!(
            r#"
                SELECT
                    duration_code AS "duration_code!",
                    COUNT(*) AS "pledge_count!",
                    COALESCE(SUM(committed_amount), 0)::bigint AS "committed_amount!"
                FROM pledges
                GROUP BY duration_code
                ORDER BY duration_code
            "#
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| CompositionSlice {
            duration_code: r.duration_code,
            pledge_count: r.pledge_count,
            committed_amount: r.committed_amount,
        })
        .collect();
        Ok(rows)
    }

    /// Most recent audit entries, newest first, stripped of `previous_value`/
    /// `new_value` — those columns mirror model rows and may carry donor
    /// fields, while the sanitized feed only ever needs action labels.
    pub async fn reporting_events(&self, limit: i64) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as!(
            EventRow,
            r#"
                SELECT ts, event_type, target_id, action
                FROM audit_log
                ORDER BY ts DESC
                LIMIT $1
            "#,
            limit
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Per-pledge timeline for donor tracking (§4.12): the pledge's own
    /// aggregate fields, every allocation drawn against it annotated with
    /// the beneficiary's sanitized fields, and its audit trail.
    pub async fn reporting_track(&self, pledge_id: &str) -> Result<Option<PledgeTrack>> {
        let Some(pledge) = self.get_pledge(pledge_id).await? else {
            return Ok(None);
        };

        let allocations = sqlx::query!(
            r#"
                SELECT a.alloc_id AS "alloc_id!", a.cms_id AS "cms_id!", b.school AS "school!",
                       a.amount AS "amount!", a.status AS "status!", b.pending_amount AS "pending_amount!"
                FROM allocations a
                JOIN beneficiaries b ON b.cms_id = a.cms_id
                WHERE a.pledge_id = $1
                ORDER BY a.created_at
            "#,
            pledge_id
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| TrackAllocation {
            alloc_id: r.alloc_id,
            cms_id: r.cms_id,
            school: r.school,
            amount: r.amount,
            status: r.status,
            pending_amount: r.pending_amount,
        })
        .collect();

        let timeline = sqlx::query_as!(
            EventRow,
            r#"
                SELECT ts, event_type, target_id, action
                FROM audit_log
                WHERE target_id = $1
                ORDER BY ts
            "#,
            pledge_id
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(PledgeTrack {
            pledge_id: pledge.pledge_id,
            status: pledge.status.as_str().to_string(),
            committed_amount: pledge.committed_amount,
            verified_total: pledge.verified_total,
            cash_balance: pledge.cash_balance,
            outstanding: pledge.outstanding,
            submitted_at: pledge.submitted_at,
            allocations,
            timeline,
        }))
    }
}
