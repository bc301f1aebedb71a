// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;

/// Source of the current instant.
///
/// Services never read the wall clock directly; status resolution and
/// grace issuance take `now` from here so they stay deterministic under test.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day in the reference timezone (UTC)
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: RwLock::new(now) }
    }

    /// Clock pinned to midday UTC on the given day
    pub fn on(date: NaiveDate) -> Self {
        let now = date
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        Self::new(now)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_reports_pinned_day() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let clock = FixedClock::on(day);
        assert_eq!(clock.today(), day);

        let later = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        clock.set(later.and_hms_opt(0, 0, 0).unwrap().and_utc());
        assert_eq!(clock.today(), later);
    }
}
