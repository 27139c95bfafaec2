// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! §4.7 read-side ledger math, plus the amount-string parsing §4.8.1 step 2
//! and the duration-to-committed-amount lookup §6 both need at the
//! boundary where free text from a form or an email becomes money.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use pledger_common::error::Result;
use pledger_common::store::Store;
use regex::Regex;

/// `get_real_time_pledge_balance` (§4.7): `verifiedTotal − Σ allocations`.
pub async fn pledge_balance(store: &Store, pledge_id: &str) -> Result<i64> {
    let pledge = store
        .get_pledge(pledge_id)
        .await?
        .ok_or_else(|| pledger_common::error::Error::NotFound(pledge_id.to_string()))?;
    let allocated = store.sum_allocations_for_pledge(pledge_id).await?;
    Ok(pledge.verified_total - allocated)
}

/// `get_real_time_student_need` (§4.7): `None` if the beneficiary is
/// unknown, never zero-and-indistinguishable-from-unknown.
pub async fn student_need(store: &Store, cms_id: &str) -> Result<Option<i64>> {
    let Some(beneficiary) = store.get_beneficiary(cms_id).await? else {
        return Ok(None);
    };
    let allocated = store.sum_allocations_for_beneficiary(cms_id).await?;
    Ok(Some(beneficiary.total_due - allocated))
}

static K_M_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*([\d,.]+)\s*(k|m)?\s*$").unwrap());
static NON_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d.]").unwrap());

/// §4.8.1 step 2: "strip non-numeric, interpret k/m suffixes". Returns 0 for
/// anything that cannot be parsed as a non-negative amount, the same
/// fallback the duration lookup below uses.
pub fn parse_amount(raw: &str) -> i64 {
    if let Some(captures) = K_M_SUFFIX.captures(raw) {
        let digits = captures.get(1).map(|m| m.as_str()).unwrap_or("0");
        let cleaned = NON_NUMERIC.replace_all(digits, "");
        let base: f64 = cleaned.parse().unwrap_or(0.0);
        let multiplier = match captures.get(2).map(|m| m.as_str().to_lowercase()) {
            Some(ref s) if s == "k" => 1_000.0,
            Some(ref s) if s == "m" => 1_000_000.0,
            _ => 1.0,
        };
        return (base * multiplier).round() as i64;
    }
    let cleaned = NON_NUMERIC.replace_all(raw, "");
    cleaned.parse::<f64>().map(|v| v.round() as i64).unwrap_or(0)
}

/// §6: `duration` decodes to a committed amount via `pledge_amounts`,
/// falling back to [`parse_amount`] for free-text overrides.
pub fn committed_amount_for_duration(pledge_amounts: &HashMap<String, i64>, duration: &str) -> i64 {
    pledge_amounts
        .get(duration)
        .copied()
        .unwrap_or_else(|| parse_amount(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integer() {
        assert_eq!(parse_amount("25000"), 25_000);
    }

    #[test]
    fn parses_k_suffix() {
        assert_eq!(parse_amount("25k"), 25_000);
        assert_eq!(parse_amount("2.5K"), 2_500);
    }

    #[test]
    fn parses_m_suffix() {
        assert_eq!(parse_amount("1.2m"), 1_200_000);
    }

    #[test]
    fn strips_thousands_separators() {
        assert_eq!(parse_amount("Rs. 25,000"), 25_000);
    }

    #[test]
    fn unparseable_input_is_zero() {
        assert_eq!(parse_amount("n/a"), 0);
    }

    #[test]
    fn committed_amount_falls_back_to_free_text_parse() {
        let amounts = HashMap::from([("Month".to_string(), 25_000)]);
        assert_eq!(committed_amount_for_duration(&amounts, "Month"), 25_000);
        assert_eq!(committed_amount_for_duration(&amounts, "50k"), 50_000);
        assert_eq!(committed_amount_for_duration(&amounts, "garbage"), 0);
    }
}
