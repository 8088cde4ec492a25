//! Overdue fine policy: a flat rate per started day, capped.

use chrono::{DateTime, Utc};
use stacks_types::Amount;

use crate::config::CirculationConfig;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Started days between `due` and `at`. Any overdue duration, however
/// short, counts as a full day; zero at or before the due date.
pub fn days_overdue(due: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    if at <= due {
        return 0;
    }
    let late_ms = (at - due).num_milliseconds().max(1);
    late_ms.div_euclid(MILLIS_PER_DAY) + i64::from(late_ms.rem_euclid(MILLIS_PER_DAY) != 0)
}

/// Fine owed for a loan due at `due`, assessed at `at`.
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use stacks_circulation::{fine::overdue_fine, CirculationConfig};
///
/// let config = CirculationConfig::default();
/// let due = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
/// assert_eq!(overdue_fine(&config, due, due), 0);
/// assert_eq!(overdue_fine(&config, due, due + Duration::days(6)), 30);
/// assert_eq!(overdue_fine(&config, due, due + Duration::days(116)), 500);
/// ```
pub fn overdue_fine(config: &CirculationConfig, due: DateTime<Utc>, at: DateTime<Utc>) -> Amount {
    days_overdue(due, at)
        .saturating_mul(config.fine_rate)
        .min(config.max_fine)
}
