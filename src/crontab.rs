//! Seconds-resolution cron expressions.
//!
//! Only the 6-field form (`sec min hour day month weekday`) is accepted.
//! The underlying parser also allows an optional year field, which is
//! rejected here so master and node agree on one syntax.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Error, Result};

pub const FIELD_COUNT: usize = 6;

pub fn parse(expr: &str) -> Result<Schedule> {
    let fields = expr.split_whitespace().count();
    if fields != FIELD_COUNT {
        return Err(Error::CronExprParse {
            expr: expr.to_string(),
            reason: format!("expected {} fields, got {}", FIELD_COUNT, fields),
        });
    }
    Schedule::from_str(expr).map_err(|e| Error::CronExprParse {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

pub fn validate(expr: &str) -> Result<()> {
    parse(expr).map(|_| ())
}

/// First fire time strictly after `after`.
pub fn next_after(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

pub fn next_fire(schedule: &Schedule) -> Option<DateTime<Utc>> {
    next_after(schedule, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn accepts_six_field_expressions() {
        for expr in [
            "*/5 * * * * *",
            "0 */1 * * * *",
            "0 30 9 * * Mon-Fri",
            "15 0 0 1 * *",
        ] {
            assert!(parse(expr).is_ok(), "{expr}");
        }
    }

    #[test]
    fn rejects_other_forms() {
        for expr in [
            "",
            "* * * * *",
            "0 0 0 1 1 * 2030",
            "61 * * * * *",
            "not a cron",
        ] {
            let err = parse(expr).unwrap_err();
            assert!(matches!(err, Error::CronExprParse { .. }), "{expr}");
        }
    }

    #[test]
    fn next_after_every_five_seconds() {
        let schedule = parse("*/5 * * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 2).unwrap();
        let next = next_after(&schedule, at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap());
    }

    #[test]
    fn next_fire_is_in_the_future() {
        let schedule = parse("*/5 * * * * *").unwrap();
        let now = Utc::now();
        let next = next_fire(&schedule).unwrap();
        assert!(next > now - chrono::Duration::seconds(1));
        assert!(next <= now + chrono::Duration::seconds(5));
    }
}
