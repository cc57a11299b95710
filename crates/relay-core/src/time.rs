//! UTC calendar-day helpers for the daily quota rollover (spec.md §4.E).

use chrono::{NaiveDate, Utc};

/// Today's date in UTC, used to decide whether `requestsToday` rolls
/// over (`lastRequestDate` is not today).
#[must_use]
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn today_utc_matches_chrono_today() {
        assert_eq!(today_utc(), Utc::now().date_naive());
    }
}
