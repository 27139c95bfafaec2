// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

pub mod ai;
pub mod audit;
pub mod blob;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod lock;
pub mod mail;
pub mod models;
pub mod store;
pub mod template;

pub mod prelude {
    pub use crate::ai::{AiOracle, ReceiptAnalysis, ReplyAnalysis};
    pub use crate::audit::AuditLog;
    pub use crate::blob::{BlobHandle, BlobStore, FsBlobStore};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::ids::IdGenerator;
    pub use crate::lock::NamedLock;
    pub use crate::mail::{MailGateway, MessageId, Thread, ThreadContext};
    pub use crate::models::*;
    pub use crate::store::Store;
    pub use crate::template::{RenderedEmail, TemplateRenderer};
}
