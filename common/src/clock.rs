// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Monotonic wall-clock seam (§4.2). Production code uses [`SystemClock`];
/// tests inject a fixed or stepping clock so FSM/reminder-cadence tests are
/// deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Formats a UTC timestamp in the single configured display timezone (§4.2).
/// Display formatting never affects stored values, which always remain UTC.
pub fn display_in_timezone(at: DateTime<Utc>, tz_name: &str) -> String {
    match tz_name.parse::<Tz>() {
        Ok(tz) => at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        Err(_) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn display_falls_back_to_utc_on_bad_timezone() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert!(display_in_timezone(at, "Not/AZone").ends_with("UTC"));
    }
}
