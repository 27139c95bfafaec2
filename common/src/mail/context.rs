// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Message, Thread};

/// CURRENT/HISTORY view of a thread handed to the AI oracle (§4.3).
#[derive(Clone, Debug)]
pub struct ThreadContext {
    pub current: String,
    pub history: Vec<String>,
    pub combined: String,
}

static QUOTE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^>.*$").unwrap());
static SIGNATURE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^--\s*$").unwrap());
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static ON_WROTE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^On .* wrote:\s*$").unwrap());

/// Strips quoted-reply lines (`> ...`), signature blocks (after a `-- `
/// delimiter), and `On ... wrote:` headers, then collapses runs of blank
/// lines (§4.3).
pub fn strip_signatures_and_quotes(body: &str) -> String {
    let without_quotes = QUOTE_LINE.replace_all(body, "");
    let truncated = match SIGNATURE_MARKER.find(&without_quotes) {
        Some(m) => &without_quotes[..m.start()],
        None => &without_quotes,
    };
    let without_on_wrote = ON_WROTE_LINE.replace_all(truncated, "");
    BLANK_RUN
        .replace_all(without_on_wrote.trim(), "\n\n")
        .to_string()
}

fn render(label: &str, msg: &Message) -> String {
    format!(
        "[{label}] From: {} Subject: {}\n{}",
        msg.from,
        msg.subject,
        strip_signatures_and_quotes(&msg.body)
    )
}

pub fn build(thread: &Thread, max_history: usize) -> ThreadContext {
    let mut messages = thread.messages.clone();
    messages.sort_by_key(|m| m.sent_at);

    let current_msg = messages.last();
    let current = current_msg
        .map(|m| render("CURRENT", m))
        .unwrap_or_default();

    let history: Vec<String> = messages
        .iter()
        .rev()
        .skip(1)
        .take(max_history)
        .map(|m| render("HISTORY", m))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let mut combined = history.join("\n\n");
    if !combined.is_empty() {
        combined.push_str("\n\n");
    }
    combined.push_str(&current);

    ThreadContext {
        current,
        history,
        combined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MessageId;
    use chrono::Utc;

    fn msg(from: &str, body: &str, offset_secs: i64) -> Message {
        Message {
            id: MessageId(format!("id:{from}")),
            from: from.to_string(),
            to: vec![],
            cc: vec![],
            subject: "Ref: PLEDGE-2026-1".to_string(),
            body: body.to_string(),
            sent_at: Utc::now() + chrono::Duration::seconds(offset_secs),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn strips_quotes_and_signature() {
        let body = "Confirmed, thanks.\n> previous text\n-- \nJohn Doe\nUAO";
        let cleaned = strip_signatures_and_quotes(body);
        assert_eq!(cleaned, "Confirmed, thanks.");
    }

    #[test]
    fn collapses_excess_blank_lines() {
        let body = "line one\n\n\n\n\nline two";
        assert_eq!(strip_signatures_and_quotes(body), "line one\n\nline two");
    }

    #[test]
    fn context_labels_newest_as_current_and_caps_history() {
        let thread = Thread {
            thread_id: "t1".into(),
            messages: vec![
                msg("donor@example.org", "first", 0),
                msg("hostel@uao.org", "second", 10),
                msg("donor@example.org", "third", 20),
                msg("hostel@uao.org", "fourth, latest", 30),
            ],
        };
        let ctx = build(&thread, 2);
        assert!(ctx.current.contains("fourth, latest"));
        assert_eq!(ctx.history.len(), 2);
        assert!(ctx.history[0].contains("second"));
        assert!(ctx.history[1].contains("third"));
        assert!(!ctx.combined.is_empty());
    }
}
