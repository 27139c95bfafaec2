// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Pledge/batch id extraction from free-text subjects and bodies (§4.9 step
//! 1, §4.10 step 2, §6 "Mail thread addressing").

use once_cell::sync::Lazy;
use regex::Regex;

static PLEDGE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"PLEDGE-\d{4}-\d+").unwrap());
static BATCH_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"BATCH-\d+").unwrap());

/// Last `PLEDGE-<year>-<row>` match in `text`, or `None`.
pub fn last_pledge_id(text: &str) -> Option<String> {
    PLEDGE_ID.find_iter(text).last().map(|m| m.as_str().to_string())
}

/// Last match of either a pledge id or a batch id in `text`, whichever
/// occurs closer to the end (§4.10 step 2's "choose the last match" applied
/// across both patterns, since a thread's subject line may carry either).
pub fn last_pledge_or_batch_id(text: &str) -> Option<String> {
    let pledge = PLEDGE_ID.find_iter(text).last();
    let batch = BATCH_ID.find_iter(text).last();
    match (pledge, batch) {
        (Some(p), Some(b)) => Some(if p.start() >= b.start() { p } else { b }.as_str().to_string()),
        (Some(m), None) | (None, Some(m)) => Some(m.as_str().to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_pledge_id_picks_last_of_several() {
        let text = "Re: Ref: PLEDGE-2026-1, was PLEDGE-2026-42";
        assert_eq!(last_pledge_id(text).as_deref(), Some("PLEDGE-2026-42"));
    }

    #[test]
    fn last_pledge_or_batch_id_prefers_whichever_is_later() {
        let text = "Ref: BATCH-1700000000000, fka PLEDGE-2026-7";
        assert_eq!(last_pledge_or_batch_id(text).as_deref(), Some("PLEDGE-2026-7"));
    }

    #[test]
    fn returns_none_when_neither_pattern_matches() {
        assert_eq!(last_pledge_or_batch_id("no reference here"), None);
    }
}
