//! Cleaning moment: checkout day at a fixed local civil time, as an instant.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use turnover_core::{Result, TurnoverError};

/// Resolve `check_out` at `time` in the IANA zone `timezone` to UTC.
///
/// A wall-clock time that occurs twice (DST fall-back) takes the earlier
/// instant; one that never occurs (spring-forward gap) moves forward an hour.
pub fn cleaning_moment(check_out: NaiveDate, time: NaiveTime, timezone: &str) -> Result<DateTime<Utc>> {
    let Ok(tz): std::result::Result<Tz, _> = timezone.trim().parse() else {
        return Err(TurnoverError::Config(format!("invalid timezone: {timezone}")));
    };
    let local = check_out.and_time(time);
    let resolved = match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(local + chrono::Duration::hours(1)))
            .earliest()
            .ok_or_else(|| {
                TurnoverError::Workflow(format!("{local} does not exist in {timezone}"))
            })?,
    };
    Ok(resolved.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_honors_property_timezone() {
        let at = cleaning_moment(date(2026, 1, 18), time(11, 0), "America/New_York").unwrap();
        assert_eq!(at, utc("2026-01-18T16:00:00Z"));

        let summer = cleaning_moment(date(2026, 7, 18), time(11, 0), "America/New_York").unwrap();
        assert_eq!(summer, utc("2026-07-18T15:00:00Z"));

        assert_eq!(
            cleaning_moment(date(2026, 1, 18), time(11, 0), "UTC").unwrap(),
            utc("2026-01-18T11:00:00Z")
        );
    }

    #[test]
    fn test_dst_edges() {
        // 2026-03-08 02:30 does not exist in New York
        let gap = cleaning_moment(date(2026, 3, 8), time(2, 30), "America/New_York").unwrap();
        assert_eq!(gap, utc("2026-03-08T07:30:00Z"));

        // 2026-11-01 01:30 happens twice; take the EDT one
        let twice = cleaning_moment(date(2026, 11, 1), time(1, 30), "America/New_York").unwrap();
        assert_eq!(twice, utc("2026-11-01T05:30:00Z"));
    }

    #[test]
    fn test_unknown_timezone() {
        assert!(matches!(
            cleaning_moment(date(2026, 1, 1), time(11, 0), "Mars/Olympus"),
            Err(TurnoverError::Config(_))
        ));
    }
}
