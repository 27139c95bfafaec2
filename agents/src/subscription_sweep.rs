// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! §4.11 scheduling: the daily reminder/lapse sweep (09:00 local) and the
//! monthly allocation batch, both driven off the same list of still-active
//! subscriptions. `SubscriptionEngine` itself is the business logic (see
//! `pledger_core::subscription`); this module is only the interval loop.

use std::sync::Arc;

use pledger_common::error::Result;
use pledger_common::lock::NamedLock;
use pledger_common::store::Store;
use pledger_core::{AllocationService, SubscriptionEngine};
use tracing::{info, warn};

pub struct SubscriptionSweep<L: NamedLock + Clone + 'static> {
    store: Store,
    engine: Arc<SubscriptionEngine<L>>,
    allocation_service: Arc<AllocationService<L>>,
}

impl<L: NamedLock + Clone + 'static> SubscriptionSweep<L> {
    pub fn new(store: Store, engine: Arc<SubscriptionEngine<L>>, allocation_service: Arc<AllocationService<L>>) -> Self {
        Self {
            store,
            engine,
            allocation_service,
        }
    }

    /// Runs the daily reminder/lapse sweep, then checks whether today is the
    /// configured monthly batch day (`run_monthly_batch` is itself a no-op
    /// on any other day).
    pub async fn run_daily(&self) -> Result<()> {
        let ids = self.store.list_active_subscription_ids().await?;
        info!(count = ids.len(), "subscription sweep running for active subscriptions");

        if let Err(e) = self.engine.run_daily_sweep(&ids).await {
            warn!(error = %e, "daily subscription sweep encountered an error");
        }
        if let Err(e) = self.engine.run_monthly_batch(&ids, self.allocation_service.as_ref()).await {
            warn!(error = %e, "monthly subscription batch encountered an error");
        }
        Ok(())
    }
}
