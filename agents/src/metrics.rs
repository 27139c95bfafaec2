// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Sweep-outcome counters (§10 ambient stack), served on a plain HTTP
//! endpoint the way `prometheus`/`autometrics` are exposed in the teacher's
//! crates. Distinct from the Sanitized Read API: this is operator-facing,
//! not donor/UI-facing, and carries no aggregate business figures at all.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static SWEEP_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("pledger_agent_sweep_outcomes_total", "Agent tick outcomes by agent and result"),
        &["agent", "outcome"],
    )
    .expect("metric definition is static and always valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric name is unique within this process");
    counter
});

#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Processed,
    Skipped,
    Error,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Processed => "processed",
            Outcome::Skipped => "skipped",
            Outcome::Error => "error",
        }
    }
}

/// Called once per tick by each scheduled agent with its own outcome.
pub fn record(agent: &str, outcome: Outcome) {
    SWEEP_OUTCOMES.with_label_values(&[agent, outcome.as_str()]).inc();
}

async fn serve_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        warn!(error = %e, "failed to encode prometheus metrics");
    }
    String::from_utf8(buf).unwrap_or_default()
}

/// Runs the `/metrics` exposition endpoint until the process exits.
pub async fn run(bind_addr: SocketAddr) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(serve_metrics));
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "agent metrics endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}
