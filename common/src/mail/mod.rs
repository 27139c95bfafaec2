// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

mod context;
mod http_gateway;

pub use context::{strip_signatures_and_quotes, ThreadContext};
pub use http_gateway::HttpMailGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Aggregate attachment cap per send (§4.3). Overflow is not a failure: the
/// caller degrades to a body note linking the blob folder instead.
pub const MAX_ATTACHMENT_BYTES: usize = 24 * 1024 * 1024;

/// Prefers the RFC-822 `Message-ID` header value; falls back to an internal
/// id when the transport has none (§4.3). Stored verbatim in ledger rows so
/// it can later be passed back into [`MailGateway::search`] or
/// [`MailGateway::send_or_reply`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn is_rfc822(&self) -> bool {
        self.0.starts_with("rfc822msgid:") || (self.0.starts_with('<') && self.0.ends_with('>'))
    }

    /// Normalizes either an `rfc822msgid:<...>` or an `id:<...>` wrapper down
    /// to the bare token used for comparisons in the Watchdog's thread-id map
    /// (§4.10 step 1, "storing both cleaned and raw forms").
    pub fn cleaned(&self) -> String {
        self.0
            .trim_start_matches("rfc822msgid:")
            .trim_start_matches("id:")
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Message {
    pub id: MessageId,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub sent_at: chrono::DateTime<chrono::Utc>,
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, Debug)]
pub struct Thread {
    pub thread_id: String,
    pub messages: Vec<Message>,
}

/// The outbound/inbound mailbox seam (§4.3). Email transport and storage are
/// an external collaborator (§1); this trait is the only way the rest of the
/// system touches it.
#[async_trait]
pub trait MailGateway: Send + Sync {
    async fn send(
        &self,
        to: &[String],
        cc: &[String],
        subject: &str,
        html_body: &str,
        attachments: &[Attachment],
    ) -> Result<MessageId>;

    /// For each `prior_id`, in order, tries to resolve a thread; on the first
    /// hit, replies-to-all preserving CCs; otherwise sends new (§4.3).
    async fn send_or_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        prior_ids: &[MessageId],
    ) -> Result<MessageId>;

    async fn search(&self, header_id: &MessageId) -> Result<Option<Thread>>;

    async fn get_or_create_label(&self, name: &str) -> Result<String>;
    async fn add_label(&self, thread_id: &str, label: &str) -> Result<()>;
    async fn remove_label(&self, thread_id: &str, label: &str) -> Result<()>;

    /// Threads carrying `label` (used by the Receipt Processor and Watchdog
    /// polling loops, §4.9/§4.10).
    async fn threads_with_label(&self, label: &str) -> Result<Vec<Thread>>;
}

/// Builds the CURRENT/HISTORY context an AI call is given (§4.3). Free
/// function over a [`Thread`] so it's usable without a live gateway in tests.
pub fn thread_context(thread: &Thread, max_history: usize) -> ThreadContext {
    context::build(thread, max_history)
}

fn attachments_total_bytes(attachments: &[Attachment]) -> usize {
    attachments.iter().map(Attachment::len).sum()
}

/// Returns `Some(note)` with a blob-folder link when `attachments` would
/// exceed [`MAX_ATTACHMENT_BYTES`]; `None` when they fit (§4.3).
pub fn overflow_note(attachments: &[Attachment], blob_folder_link: &str) -> Option<String> {
    if attachments_total_bytes(attachments) > MAX_ATTACHMENT_BYTES {
        Some(format!(
            "Attachments exceeded the inline size limit; see {blob_folder_link} for the full set."
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaned_strips_rfc822_and_angle_brackets() {
        assert_eq!(
            MessageId("rfc822msgid:<abc@mail.example>".into()).cleaned(),
            "abc@mail.example"
        );
        assert_eq!(MessageId("id:xyz123".into()).cleaned(), "xyz123");
        assert_eq!(MessageId("<abc@mail.example>".into()).cleaned(), "abc@mail.example");
    }

    #[test]
    fn overflow_note_only_when_over_cap() {
        let small = vec![Attachment {
            filename: "a.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![0u8; 1024],
        }];
        assert!(overflow_note(&small, "link").is_none());

        let big = vec![Attachment {
            filename: "a.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![0u8; MAX_ATTACHMENT_BYTES + 1],
        }];
        assert!(overflow_note(&big, "link").unwrap().contains("link"));
    }
}
