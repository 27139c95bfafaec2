// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::blob::{BlobHandle, BlobStore};
use crate::error::Result;

/// A fetched, unsubstituted template: subject line and HTML body, both
/// containing `{{key}}` placeholders (§4.4).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawTemplate {
    pub subject: String,
    pub html_body: String,
}

/// Blob-handle constants for every template this system renders. A handle is
/// just a well-known key in the blob folder (§4.4): an operator overrides a
/// template by writing a `{subject, html_body}` JSON document under that
/// name, without touching code.
pub mod handles {
    pub const PLEDGE_CONFIRMATION: &str = "templates/pledge-confirmation.json";
    pub const HOSTEL_INTIMATION: &str = "templates/hostel-intimation.json";
    pub const HOSTEL_INTIMATION_BATCH: &str = "templates/hostel-intimation-batch.json";
    pub const DONOR_INTERMEDIATE: &str = "templates/donor-intermediate.json";
    pub const SUBSCRIPTION_WELCOME: &str = "templates/subscription-welcome.json";
    pub const INSTALLMENT_REMINDER_DUE: &str = "templates/installment-reminder-due.json";
    pub const INSTALLMENT_REMINDER_OVERDUE: &str = "templates/installment-reminder-overdue.json";
    pub const SUBSCRIPTION_COMPLETION: &str = "templates/subscription-completion.json";
    pub const DONOR_QUERY_FALLBACK: &str = "templates/donor-query-fallback.json";
    pub const HOSTEL_VERIFIED_NOTICE: &str = "templates/hostel-verified-notice.json";
    pub const WATCHDOG_ALERT: &str = "templates/watchdog-alert.json";
}

/// Fetches `handle` from the blob store and parses it as a `RawTemplate`;
/// falls back to `default` when the handle hasn't been seeded yet — a
/// template is meant to be human-editable after the fact, so its absence is
/// the normal pre-customization state, not an error (§4.4).
pub async fn fetch_or_default(blobs: &dyn BlobStore, handle: &str, default: RawTemplate) -> RawTemplate {
    match blobs.get(&BlobHandle(handle.to_string())).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(default),
        Err(_) => default,
    }
}

#[derive(Clone, Debug)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
}

/// Reserved placeholder: also matches the sentinel URL (with or without a
/// redirect wrapper) so human-edited templates can host a mailto anchor
/// (§4.4).
const MAILTO_PLACEHOLDER: &str = "mailtoLink";
const MAILTO_SENTINEL: &str = "SEND_CONFIRMATION_EMAIL";

// Matches an `href="..."` value anywhere containing the sentinel token, so a
// redirect wrapper around the sentinel (e.g. a click-tracking link whose
// target query param embeds `SEND_CONFIRMATION_EMAIL`) is replaced whole
// rather than leaving a half-substituted URL behind.
static SENTINEL_HREF: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r#"href="[^"]*SEND_CONFIRMATION_EMAIL[^"]*""#)
        .case_insensitive(true)
        .build()
        .unwrap()
});

/// Fetches a template (via the injected `fetch` closure, keeping blob/template
/// storage an opaque collaborator) and substitutes `{{key}}` placeholders.
pub struct TemplateRenderer;

impl TemplateRenderer {
    /// Substitutes every `{{key}}` in `template` with `values[key]`
    /// (regex-escaped), plus the `mailtoLink` sentinel-URL substitution, then
    /// wraps the body for mobile readability: max-width 600px, white
    /// background (§4.4).
    pub fn render(template: &RawTemplate, values: &HashMap<String, String>) -> Result<RenderedEmail> {
        let subject = substitute(&template.subject, values);
        let body = substitute(&template.html_body, values);
        let body = wrap_for_mobile(&body);
        Ok(RenderedEmail {
            subject,
            html_body: body,
        })
    }
}

fn substitute(text: &str, values: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    if let Some(mailto) = values.get(MAILTO_PLACEHOLDER) {
        let replacement = format!("href=\"{mailto}\"");
        out = SENTINEL_HREF.replace_all(&out, replacement.as_str()).to_string();
    }
    for (key, value) in values {
        let placeholder = format!("{{{{{key}}}}}");
        out = out.replace(&placeholder, value);
    }
    out
}

fn wrap_for_mobile(body: &str) -> String {
    format!(
        "<div style=\"max-width:600px;margin:0 auto;background-color:#ffffff;\">{body}</div>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> HashMap<String, String> {
        HashMap::from([
            ("donorName".to_string(), "Amina".to_string()),
            ("amount".to_string(), "25,000".to_string()),
        ])
    }

    #[test]
    fn substitutes_known_keys() {
        let tpl = RawTemplate {
            subject: "Thank you {{donorName}}".into(),
            html_body: "<p>We received {{amount}} PKR.</p>".into(),
        };
        let rendered = TemplateRenderer::render(&tpl, &values()).unwrap();
        assert_eq!(rendered.subject, "Thank you Amina");
        assert!(rendered.html_body.contains("25,000 PKR"));
        assert!(rendered.html_body.contains("max-width:600px"));
    }

    #[test]
    fn mailto_sentinel_matches_with_and_without_redirect_wrapper() {
        let mut values = values();
        values.insert(
            MAILTO_PLACEHOLDER.to_string(),
            "mailto:donor@example.org?subject=Confirm".to_string(),
        );
        let tpl = RawTemplate {
            subject: "s".into(),
            html_body:
                "<a href=\"http://SEND_CONFIRMATION_EMAIL\">confirm</a> and \
                 <a href=\"https://redirect.example/r?u=http://send_confirmation_email\">confirm</a>"
                    .into(),
        };
        let rendered = TemplateRenderer::render(&tpl, &values).unwrap();
        assert!(rendered.html_body.contains("mailto:donor@example.org?subject=Confirm"));
        assert!(!rendered.html_body.to_lowercase().contains("send_confirmation_email"));
    }

    #[test]
    fn leaves_unknown_placeholders_untouched() {
        let tpl = RawTemplate {
            subject: "{{unknown}}".into(),
            html_body: "body".into(),
        };
        let rendered = TemplateRenderer::render(&tpl, &values()).unwrap();
        assert_eq!(rendered.subject, "{{unknown}}");
    }
}
