// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! §6 "Inbound form event": the only way a Pledge row is ever created.
//! Exposed as a small HTTP listener, separate from the Sanitized Read API
//! (that surface is strictly read-only and donor/UI-facing under a
//! different secret) and from the scheduled agents (this one is triggered
//! by the form submission itself, not a tick).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use pledger_common::blob::BlobStore;
use pledger_common::clock::Clock;
use pledger_common::config::Config;
use pledger_common::error::{Error, Result};
use pledger_common::ids::IdGenerator;
use pledger_common::lock::NamedLock;
use pledger_common::mail::MailGateway;
use pledger_common::models::{Pledge, PledgeState};
use pledger_common::store::Store;
use pledger_common::template::{fetch_or_default, handles, RawTemplate, TemplateRenderer};
use pledger_core::{ledger, SubscriptionEngine};
use serde::Serialize;
use tracing::{info, warn};

const LOCK_WAIT: Duration = Duration::from_secs(30);

pub struct IntakeService<L: NamedLock + Clone + 'static> {
    store: Store,
    mail: Arc<dyn MailGateway>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    lock: L,
    config: Config,
    ids: IdGenerator,
    subscriptions: Arc<SubscriptionEngine<L>>,
}

impl<L: NamedLock + Clone + 'static> IntakeService<L> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        mail: Arc<dyn MailGateway>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        lock: L,
        config: Config,
        subscriptions: Arc<SubscriptionEngine<L>>,
    ) -> Self {
        Self {
            store,
            mail,
            blobs,
            clock,
            lock,
            config,
            ids: IdGenerator,
            subscriptions,
        }
    }

    /// Decodes a submitted pledge form into a Pledge row, sends the
    /// confirmation email, and — when `pledgeType == "Monthly Recurring"` —
    /// creates the subscription alongside it (§6, §4.11 "Create").
    pub async fn submit_pledge(&self, fields: &HashMap<String, String>) -> Result<String> {
        let donor_email = fields.get("donorEmail").cloned().unwrap_or_default();
        let donor_name = fields.get("donorName").cloned().unwrap_or_default();
        if donor_email.trim().is_empty() || donor_name.trim().is_empty() {
            return Err(Error::InvalidInput("donorEmail and donorName are required".to_string()));
        }

        let chapter = fields.get("chapter").cloned().unwrap_or_else(|| "Other".to_string());
        let affiliation = fields.get("country").cloned().unwrap_or_default();
        let zakat = fields
            .get("zakat")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "1"))
            .unwrap_or(false);
        let duration = fields.get("duration").cloned().unwrap_or_default();
        let committed_amount = ledger::committed_amount_for_duration(&self.config.pledge_amounts, &duration);

        let now = self.clock.now();
        let row_number = self
            .lock
            .with_lock("pledge_intake", LOCK_WAIT, move || {
                let this = self;
                Box::pin(async move { Ok(this.store.count_pledges().await? + 1) })
            })
            .await?;
        let pledge_id = self.ids.pledge_id(now, row_number);

        let pledge = Pledge {
            pledge_id: pledge_id.clone(),
            donor_email: donor_email.clone(),
            donor_display_name: donor_name.clone(),
            chapter,
            affiliation,
            zakat,
            duration_code: duration,
            committed_amount,
            status: PledgeState::Pledged,
            submitted_at: now,
            confirmation_message_id: None,
            receipt_message_id: None,
            verified_total: 0,
            cash_balance: 0,
            outstanding: committed_amount,
        };
        self.store.insert_pledge(&pledge).await?;

        let template = fetch_or_default(
            self.blobs.as_ref(),
            handles::PLEDGE_CONFIRMATION,
            default_confirmation_template(),
        )
        .await;
        let mut values = HashMap::new();
        values.insert("donorName".to_string(), donor_name.clone());
        values.insert("pledgeId".to_string(), pledge_id.clone());
        values.insert("committedAmount".to_string(), committed_amount.to_string());
        let rendered = TemplateRenderer::render(&template, &values)?;
        let message_id = self
            .mail
            .send(&[donor_email.clone()], &[], &rendered.subject, &rendered.html_body, &[])
            .await?;
        self.store.set_pledge_confirmation_message_id(&pledge_id, &message_id.0).await?;

        if fields.get("pledgeType").map(String::as_str) == Some("Monthly Recurring") {
            let monthly_amount = fields
                .get("monthlyAmount")
                .map(|v| ledger::parse_amount(v))
                .unwrap_or(0);
            let monthly_duration = fields
                .get("monthlyDuration")
                .and_then(|v| v.trim().parse::<i32>().ok())
                .unwrap_or(0);
            self.subscriptions
                .create_subscription(&pledge_id, &donor_email, &donor_name, monthly_amount, monthly_duration, "")
                .await?;
        }

        info!(pledge_id, committed_amount, "pledge submitted");
        Ok(pledge_id)
    }
}

fn default_confirmation_template() -> RawTemplate {
    RawTemplate {
        subject: "Ref: {{pledgeId}} | Thank you for your pledge".to_string(),
        html_body: "<p>Thank you {{donorName}}. We've recorded your pledge of {{committedAmount}} \
             ({{pledgeId}}).</p>"
            .to_string(),
    }
}

#[derive(Clone)]
struct AppState<L: NamedLock + Clone + 'static> {
    intake: Arc<IntakeService<L>>,
}

#[derive(Serialize)]
struct SubmitResponse {
    #[serde(rename = "pledgeId")]
    pledge_id: String,
}

async fn submit<L: NamedLock + Clone + 'static>(
    State(state): State<AppState<L>>,
    Json(fields): Json<HashMap<String, String>>,
) -> Response {
    match state.intake.submit_pledge(&fields).await {
        Ok(pledge_id) => (StatusCode::CREATED, Json(SubmitResponse { pledge_id })).into_response(),
        Err(e @ Error::InvalidInput(_)) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e) => {
            warn!(error = %e, "pledge intake failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "pledge intake failed").into_response()
        }
    }
}

/// Runs the `/pledges` intake endpoint until the process exits.
pub async fn run<L: NamedLock + Clone + 'static>(bind_addr: SocketAddr, intake: Arc<IntakeService<L>>) -> anyhow::Result<()> {
    let state = AppState { intake };
    let app = Router::new().route("/pledges", post(submit::<L>)).with_state(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "pledge intake endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}
