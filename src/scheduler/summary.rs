use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::pipeline::ScanResult;

/// Once-a-day status report.
///
/// Fires when the wall clock reaches the configured minute or when it is
/// crossed between two checks, at most once per calendar day.
#[derive(Debug, Clone)]
pub struct DailySummary {
    at: NaiveTime,
    last_checked: Option<NaiveDateTime>,
    sent_on: Option<NaiveDate>,
    totals: ScanResult,
    cycles: u64,
}

impl DailySummary {
    pub fn new(at: NaiveTime) -> Self {
        Self {
            at,
            last_checked: None,
            sent_on: None,
            totals: ScanResult::default(),
            cycles: 0,
        }
    }

    /// Add one finished cycle to the running totals
    pub fn record(&mut self, result: &ScanResult) {
        self.totals.merge(result);
        self.cycles += 1;
    }

    pub fn is_due(&mut self, now: NaiveDateTime) -> bool {
        let previous = self.last_checked.replace(now);
        if self.sent_on == Some(now.date()) {
            return false;
        }

        let same_minute = now.hour() == self.at.hour() && now.minute() == self.at.minute();
        let target = now.date().and_time(self.at);
        let crossed = previous.is_some_and(|prev| prev < target && target <= now);
        same_minute || crossed
    }

    /// Render the report, mark `today` as sent and reset the counters
    pub fn take_report(&mut self, today: NaiveDate) -> String {
        let report = format!(
            "📊 Daily Summary:\n\
             ✅ Messages Processed: {}\n\
             ✅ Messages Forwarded: {}\n\
             ⚠️ Failed Forwards: {}\n\
             🔁 Scan Cycles: {}\n\
             🚀 The bot is running smoothly!",
            self.totals.examined, self.totals.forwarded, self.totals.failed_forwards, self.cycles
        );
        self.sent_on = Some(today);
        self.totals = ScanResult::default();
        self.cycles = 0;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn one_am() -> DailySummary {
        DailySummary::new(NaiveTime::from_hms_opt(1, 0, 0).unwrap())
    }

    #[test]
    fn test_fires_once_within_the_minute() {
        let mut summary = one_am();
        assert!(summary.is_due(at("2026-03-01", "01:00:05")));
        summary.take_report(at("2026-03-01", "01:00:05").date());
        assert!(!summary.is_due(at("2026-03-01", "01:00:40")));
    }

    #[test]
    fn test_fires_when_boundary_is_crossed_between_checks() {
        let mut summary = one_am();
        assert!(!summary.is_due(at("2026-03-01", "00:57:00")));
        assert!(summary.is_due(at("2026-03-01", "01:02:00")));
    }

    #[test]
    fn test_crossing_midnight_target() {
        let mut summary = DailySummary::new(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        assert!(!summary.is_due(at("2026-03-01", "23:58:00")));
        assert!(summary.is_due(at("2026-03-02", "00:03:00")));
    }

    #[test]
    fn test_does_not_fire_on_startup_after_target() {
        let mut summary = one_am();
        assert!(!summary.is_due(at("2026-03-01", "15:00:00")));
        assert!(!summary.is_due(at("2026-03-01", "15:05:00")));
    }

    #[test]
    fn test_fires_again_next_day() {
        let mut summary = one_am();
        assert!(summary.is_due(at("2026-03-01", "01:00:00")));
        summary.take_report(at("2026-03-01", "01:00:00").date());
        assert!(!summary.is_due(at("2026-03-02", "00:58:00")));
        assert!(summary.is_due(at("2026-03-02", "01:03:00")));
    }

    #[test]
    fn test_report_resets_counters() {
        let mut summary = one_am();
        summary.record(&ScanResult {
            examined: 12,
            forwarded: 3,
            failed_forwards: 1,
            skipped_sources: 0,
        });
        summary.record(&ScanResult {
            examined: 8,
            ..Default::default()
        });

        let report = summary.take_report(at("2026-03-01", "01:00:00").date());
        assert!(report.contains("Messages Processed: 20"));
        assert!(report.contains("Messages Forwarded: 3"));
        assert!(report.contains("Scan Cycles: 2"));

        let next = summary.take_report(at("2026-03-02", "01:00:00").date());
        assert!(next.contains("Messages Processed: 0"));
    }
}
