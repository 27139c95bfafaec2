// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// The closed error taxonomy shared by every component. No component leaks a
/// database driver error, an HTTP error, or a panic across its boundary; each
/// is mapped into one of these variants so callers branch on `Kind`, not on
/// text.
#[derive(Debug, Error)]
pub enum Error {
    #[error("system busy, retry: failed to acquire lock `{name}` within {wait_ms}ms")]
    Busy { name: String, wait_ms: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no proof of transfer recorded for pledge {0}")]
    NoProof(String),

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: i64, available: i64 },

    #[error("exceeds beneficiary need: requested {requested}, need {need}")]
    ExceedsNeed { requested: i64, need: i64 },

    #[error("unknown student: {0}")]
    UnknownStudent(String),

    #[error("invalid state transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("mail send failed: {0}")]
    MailSendFailed(String),

    #[error("AI oracle returned no result for {0}")]
    AiNull(&'static str),

    #[error("orphan email: {message_id} sent for {target} but the append failed: {cause}")]
    OrphanEmail {
        message_id: String,
        target: String,
        cause: String,
    },

    #[error("schema drift: {0}")]
    SchemaDrift(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("blob store I/O error: {0}")]
    BlobIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
