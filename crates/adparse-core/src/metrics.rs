//! Statistics derived from a history sequence. Recomputed on every call; nothing is cached.

use serde::Serialize;

use crate::{ParseResult, ParseStatus};

pub fn success_count(history: &[ParseResult]) -> usize {
    count_status(history, ParseStatus::Success)
}

pub fn failure_count(history: &[ParseResult]) -> usize {
    count_status(history, ParseStatus::Failed)
}

fn count_status(history: &[ParseResult], status: ParseStatus) -> usize {
    history.iter().filter(|item| item.status == status).count()
}

/// Sum of `cost` over every entry.
pub fn total_spend(history: &[ParseResult]) -> u64 {
    history.iter().map(|item| u64::from(item.cost)).sum()
}

/// Percentage of successful entries rounded half-up, or `None` for an empty history.
pub fn success_rate(history: &[ParseResult]) -> Option<u32> {
    rounded_percent(success_count(history), history.len())
}

fn rounded_percent(part: usize, total: usize) -> Option<u32> {
    if total == 0 {
        return None;
    }
    let (part, total) = (part as u64, total as u64);
    Some(((200 * part + total) / (2 * total)) as u32)
}

/// Everything the account view shows, computed in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub success_rate: Option<u32>,
    pub total_spend: u64,
}

impl HistoryStats {
    pub fn from_history(history: &[ParseResult]) -> Self {
        let mut stats = Self {
            total: history.len(),
            ..Self::default()
        };
        for item in history {
            match item.status {
                ParseStatus::Success => stats.successes += 1,
                ParseStatus::Failed => stats.failures += 1,
            }
            stats.total_spend += u64::from(item.cost);
        }
        stats.success_rate = rounded_percent(stats.successes, stats.total);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Platform;
    use chrono::{TimeZone, Utc};

    fn entry(status: ParseStatus, cost: u32) -> ParseResult {
        let timestamp = Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap();
        match status {
            ParseStatus::Success => {
                ParseResult::success("https://avito.ru/1", Platform::Avito, "+7 (900) 123-45-67", cost, timestamp)
            }
            ParseStatus::Failed => ParseResult::failed("https://rabota.ru/2", Platform::Rabota, timestamp),
        }
    }

    #[test]
    fn total_spend_sums_costs_exactly() {
        let history = vec![
            entry(ParseStatus::Success, 15),
            entry(ParseStatus::Failed, 0),
            entry(ParseStatus::Success, 15),
        ];
        assert_eq!(total_spend(&history), 30);
        assert_eq!(success_count(&history), 2);
        assert_eq!(failure_count(&history), 1);
    }

    #[test]
    fn empty_history_has_no_success_rate() {
        assert_eq!(success_rate(&[]), None);
        let stats = HistoryStats::from_history(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, None);
        assert_eq!(stats.total_spend, 0);
    }

    #[test]
    fn success_rate_rounds_half_up() {
        let two_of_three = vec![
            entry(ParseStatus::Success, 15),
            entry(ParseStatus::Success, 15),
            entry(ParseStatus::Failed, 0),
        ];
        assert_eq!(success_rate(&two_of_three), Some(67));

        let one_of_eight: Vec<_> = std::iter::once(entry(ParseStatus::Success, 15))
            .chain((0..7).map(|_| entry(ParseStatus::Failed, 0)))
            .collect();
        // 12.5% rounds up
        assert_eq!(success_rate(&one_of_eight), Some(13));

        assert_eq!(success_rate(&[entry(ParseStatus::Failed, 0)]), Some(0));
        assert_eq!(success_rate(&[entry(ParseStatus::Success, 10)]), Some(100));
    }

    #[test]
    fn stats_agree_with_individual_functions() {
        let history = vec![
            entry(ParseStatus::Success, 20),
            entry(ParseStatus::Failed, 0),
            entry(ParseStatus::Success, 10),
            entry(ParseStatus::Failed, 0),
        ];
        let stats = HistoryStats::from_history(&history);
        assert_eq!(stats.successes, success_count(&history));
        assert_eq!(stats.failures, failure_count(&history));
        assert_eq!(stats.total_spend, total_spend(&history));
        assert_eq!(stats.success_rate, Some(50));
    }
}
