// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;

/// `hostelIntimationMode` (§6): whether hostel-facing emails are sent per
/// allocation, batched, or both.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostelIntimationMode {
    Individual,
    Batched,
    #[default]
    Both,
}

#[serde_inline_default]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Days-after-due on which a reminder is sent.
    #[serde_inline_default(vec![0, 7])]
    pub reminder_days: Vec<i64>,
    #[serde_inline_default(2)]
    pub max_reminders: u32,
    #[serde_inline_default(14)]
    pub overdue_threshold_days: i64,
    #[serde_inline_default(30)]
    pub lapsed_threshold_days: i64,
    #[serde_inline_default(HostelIntimationMode::default())]
    pub hostel_intimation_mode: HostelIntimationMode,
    #[serde_inline_default(10)]
    pub batch_intimation_day: u32,
    #[serde_inline_default(false)]
    pub allow_student_change: bool,
    #[serde_inline_default(default_pledge_amounts())]
    pub pledge_amounts: HashMap<String, i64>,
    #[serde_inline_default(default_chapter_leads())]
    pub chapter_leads: HashMap<String, Vec<String>>,
    #[serde_inline_default(Vec::new())]
    pub always_cc: Vec<String>,
    #[serde_inline_default("gemini-1.5-pro".to_string())]
    pub gemini_model: String,
    /// Hostel/UAO mail domains (§4.9 step 2, §4.10 search scope) — messages
    /// from these are never routed through the AI extraction path.
    #[serde_inline_default(Vec::new())]
    pub internal_domains: Vec<String>,
    /// Equal-split per-student amount for a subscription's monthly batch
    /// when no explicit per-student amount is configured (§4.11).
    #[serde_inline_default(25_000)]
    pub subscription_default_student_amount: i64,
    #[serde_inline_default("Asia/Karachi".to_string())]
    pub display_timezone: String,
}

fn default_pledge_amounts() -> HashMap<String, i64> {
    HashMap::from([
        ("Month".to_string(), 25_000),
        ("Semester".to_string(), 150_000),
        ("Year".to_string(), 300_000),
        ("Four Years".to_string(), 1_200_000),
    ])
}

fn default_chapter_leads() -> HashMap<String, Vec<String>> {
    HashMap::from([("Other".to_string(), Vec::new())])
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("empty TOML document always deserializes via defaults")
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// `chapterLeads[chapter]`, falling back to the required `'Other'` entry.
    pub fn leads_for_chapter(&self, chapter: &str) -> &[String] {
        self.chapter_leads
            .get(chapter)
            .or_else(|| self.chapter_leads.get("Other"))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// §4.9 step 2: a hostel/UAO sender, matched either by a configured
    /// domain suffix or by appearing in some chapter's lead list.
    pub fn is_internal_sender(&self, email: &str) -> bool {
        let email = email.to_ascii_lowercase();
        let domain_match = self
            .internal_domains
            .iter()
            .any(|d| email.ends_with(&d.to_ascii_lowercase()));
        domain_match
            || self
                .chapter_leads
                .values()
                .any(|leads| leads.iter().any(|l| l.to_ascii_lowercase() == email))
    }
}

/// Process-wide secrets, loaded from the environment (never from a config
/// file or a data row), mirroring the teacher's `config::Cli` env-var
/// fallback for credentials.
#[derive(Clone, Debug, Parser)]
#[command(name = "pledger", about = "Charitable-pledge reconciliation engine")]
pub struct Secrets {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: String,

    #[arg(long, env = "REPORTING_SALT")]
    pub reporting_salt: String,

    #[arg(long, env = "CONFIG_PATH", default_value = "pledger.toml")]
    pub config_path: String,
}

impl Secrets {
    /// Loads `.env` (if present) before parsing, matching the teacher's
    /// `dotenvy::dotenv().ok()` startup sequence.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.reminder_days, vec![0, 7]);
        assert_eq!(cfg.max_reminders, 2);
        assert_eq!(cfg.overdue_threshold_days, 14);
        assert_eq!(cfg.lapsed_threshold_days, 30);
        assert_eq!(cfg.batch_intimation_day, 10);
        assert_eq!(cfg.pledge_amounts.get("Year"), Some(&300_000));
        assert!(cfg.chapter_leads.contains_key("Other"));
    }

    #[test]
    fn leads_for_chapter_falls_back_to_other() {
        let mut cfg = Config::default();
        cfg.chapter_leads
            .insert("Karachi".to_string(), vec!["lead@example.org".to_string()]);
        assert_eq!(cfg.leads_for_chapter("Karachi"), &["lead@example.org"]);
        assert_eq!(cfg.leads_for_chapter("Unknown"), &[] as &[String]);
    }

    #[test]
    fn is_internal_sender_matches_domain_or_lead_list() {
        let mut cfg = Config::default();
        cfg.internal_domains = vec!["@uao.edu.pk".to_string()];
        cfg.chapter_leads
            .insert("Karachi".to_string(), vec!["hostel-lead@example.org".to_string()]);

        assert!(cfg.is_internal_sender("Warden@UAO.EDU.PK"));
        assert!(cfg.is_internal_sender("hostel-lead@example.org"));
        assert!(!cfg.is_internal_sender("donor@example.com"));
    }
}
