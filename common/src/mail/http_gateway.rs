// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

use super::{Attachment, Message, MailGateway, MessageId, Thread};

/// Adapter over an opaque mailbox HTTP API (§1: "email transport and storage
/// ... a mailbox with search-by-header" is an external collaborator). Mirrors
/// the teacher's `SubgraphClient`: a thin `reqwest::Client` wrapper with one
/// typed method per remote operation and errors mapped into this crate's
/// taxonomy rather than leaked as `reqwest::Error`.
pub struct HttpMailGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMailGateway {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    to: &'a [String],
    cc: &'a [String],
    subject: &'a str,
    html_body: &'a str,
    attachments: Vec<AttachmentDto>,
}

#[derive(Serialize)]
struct AttachmentDto {
    filename: String,
    mime_type: String,
    base64_bytes: String,
}

#[derive(Serialize)]
struct ReplyRequest<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    prior_ids: Vec<String>,
}

#[derive(Deserialize)]
struct SendResponse {
    message_id: String,
}

#[derive(Deserialize)]
struct ThreadDto {
    thread_id: String,
    messages: Vec<MessageDto>,
}

#[derive(Deserialize)]
struct MessageDto {
    id: String,
    from: String,
    to: Vec<String>,
    cc: Vec<String>,
    subject: String,
    body: String,
    sent_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    attachments: Vec<InboundAttachmentDto>,
}

#[derive(Deserialize)]
struct InboundAttachmentDto {
    filename: String,
    mime_type: String,
    base64_bytes: String,
}

impl TryFrom<InboundAttachmentDto> for Attachment {
    type Error = Error;

    fn try_from(dto: InboundAttachmentDto) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(dto.base64_bytes)
            .map_err(|e| Error::SchemaDrift(format!("attachment base64 decode failed: {e}")))?;
        Ok(Attachment {
            filename: dto.filename,
            mime_type: dto.mime_type,
            bytes,
        })
    }
}

impl From<ThreadDto> for Thread {
    fn from(dto: ThreadDto) -> Self {
        Thread {
            thread_id: dto.thread_id,
            messages: dto
                .messages
                .into_iter()
                .map(|m| Message {
                    id: MessageId(m.id),
                    from: m.from,
                    to: m.to,
                    cc: m.cc,
                    subject: m.subject,
                    body: m.body,
                    sent_at: m.sent_at,
                    attachments: m
                        .attachments
                        .into_iter()
                        .filter_map(|a| Attachment::try_from(a).ok())
                        .collect(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl MailGateway for HttpMailGateway {
    async fn send(
        &self,
        to: &[String],
        cc: &[String],
        subject: &str,
        html_body: &str,
        attachments: &[Attachment],
    ) -> Result<MessageId> {
        let attachments = attachments
            .iter()
            .map(|a| AttachmentDto {
                filename: a.filename.clone(),
                mime_type: a.mime_type.clone(),
                base64_bytes: base64::engine::general_purpose::STANDARD.encode(&a.bytes),
            })
            .collect();

        let response = self
            .client
            .post(self.url("/messages/send"))
            .json(&SendRequest {
                to,
                cc,
                subject,
                html_body,
                attachments,
            })
            .send()
            .await
            .map_err(|e| Error::MailSendFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::MailSendFailed(format!(
                "mailbox returned {}",
                response.status()
            )));
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| Error::MailSendFailed(e.to_string()))?;
        Ok(MessageId(parsed.message_id))
    }

    async fn send_or_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        prior_ids: &[MessageId],
    ) -> Result<MessageId> {
        for prior in prior_ids {
            if let Some(thread) = self.search(prior).await.unwrap_or_else(|e| {
                warn!(error = %e, prior_id = %prior, "thread lookup failed, trying next prior id");
                None
            }) {
                let response = self
                    .client
                    .post(self.url("/messages/reply"))
                    .json(&ReplyRequest {
                        to,
                        subject,
                        body,
                        prior_ids: vec![thread.thread_id],
                    })
                    .send()
                    .await
                    .map_err(|e| Error::MailSendFailed(e.to_string()))?;
                let parsed: SendResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::MailSendFailed(e.to_string()))?;
                return Ok(MessageId(parsed.message_id));
            }
        }

        self.send(&[to.to_string()], &[], subject, body, &[]).await
    }

    async fn search(&self, header_id: &MessageId) -> Result<Option<Thread>> {
        let response = self
            .client
            .get(self.url(&format!("/threads/search/{}", header_id.cleaned())))
            .send()
            .await
            .map_err(Error::Request)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::MailSendFailed(format!(
                "search returned {}",
                response.status()
            )));
        }
        let dto: ThreadDto = response.json().await.map_err(Error::Request)?;
        Ok(Some(dto.into()))
    }

    async fn get_or_create_label(&self, name: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct LabelResponse {
            label_id: String,
        }
        let response = self
            .client
            .post(self.url("/labels"))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(Error::Request)?;
        let parsed: LabelResponse = response.json().await.map_err(Error::Request)?;
        Ok(parsed.label_id)
    }

    async fn add_label(&self, thread_id: &str, label: &str) -> Result<()> {
        self.client
            .post(self.url(&format!("/threads/{thread_id}/labels/{label}")))
            .send()
            .await
            .map_err(Error::Request)?;
        Ok(())
    }

    async fn remove_label(&self, thread_id: &str, label: &str) -> Result<()> {
        self.client
            .delete(self.url(&format!("/threads/{thread_id}/labels/{label}")))
            .send()
            .await
            .map_err(Error::Request)?;
        Ok(())
    }

    async fn threads_with_label(&self, label: &str) -> Result<Vec<Thread>> {
        let response = self
            .client
            .get(self.url(&format!("/threads?label={label}")))
            .send()
            .await
            .map_err(Error::Request)?;
        let dtos: Vec<ThreadDto> = response.json().await.map_err(Error::Request)?;
        Ok(dtos.into_iter().map(Thread::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn send_returns_captured_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/send"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "message_id": "rfc822msgid:<abc@example.org>"
                })),
            )
            .mount(&server)
            .await;

        let gateway = HttpMailGateway::new(reqwest::Client::new(), server.uri());
        let id = gateway
            .send(&["donor@example.org".into()], &[], "Ref: PLEDGE-2026-1", "<p>hi</p>", &[])
            .await
            .unwrap();
        assert_eq!(id.0, "rfc822msgid:<abc@example.org>");
    }

    #[tokio::test]
    async fn search_returns_none_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gateway = HttpMailGateway::new(reqwest::Client::new(), server.uri());
        let found = gateway.search(&MessageId("missing".into())).await.unwrap();
        assert!(found.is_none());
    }
}
