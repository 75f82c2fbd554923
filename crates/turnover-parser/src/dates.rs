//! Stay-date extraction.
//!
//! Strategies run in order and each only fills fields still unknown:
//! 1. numeric `MM/DD/YYYY` after a check-in / check-out label
//! 2. a date range after a `Dates:` / `Arrival - Departure:` label
//! 3. `Month Day[, Year]` after a check-in / check-out label, with the year
//!    inferred from "today" when missing
//!
//! Anything unparseable leaves the field `None`; it never fails the booking.

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

/// Past window before a yearless date rolls over to next year.
const PAST_GRACE_DAYS: i64 = 30;
/// Future window before a yearless date is read as last year. Wide enough for
/// a summer stay booked in winter, narrow enough that a December date read
/// in March is last December's.
const FUTURE_HORIZON_DAYS: i64 = 240;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StayDates {
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
}

impl StayDates {
    fn complete(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_some()
    }
}

static NUMERIC_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)check[\s-]?in(?:\s+date)?\s*:?\s*(\d{1,2}/\d{1,2}/\d{4})")
        .expect("static regex")
});
static NUMERIC_OUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)check[\s-]?out(?:\s+date)?\s*:?\s*(\d{1,2}/\d{1,2}/\d{4})")
        .expect("static regex")
});
static RANGE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:dates|stay|arrival\s*[-–/]\s*departure)\s*:\s*([^\n]+)")
        .expect("static regex")
});
static RANGE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:-|–|—|\bto\b|\buntil\b)\s*").expect("static regex"));
static MONTH_DAY_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)check[\s-]?in(?:\s+date)?\s*:?\s*(?:[a-z]{3,9},?\s+)?([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s+(\d{4}))?",
    )
    .expect("static regex")
});
static MONTH_DAY_OUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)check[\s-]?out(?:\s+date)?\s*:?\s*(?:[a-z]{3,9},?\s+)?([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s+(\d{4}))?",
    )
    .expect("static regex")
});

/// Extract check-in / check-out dates. `today` anchors year inference.
pub fn extract_dates(text: &str, today: NaiveDate) -> StayDates {
    let mut dates = StayDates {
        check_in: capture(&NUMERIC_IN, text).and_then(|s| parse_numeric(&s)),
        check_out: capture(&NUMERIC_OUT, text).and_then(|s| parse_numeric(&s)),
    };

    if !dates.complete()
        && let Some(range) = RANGE_LABEL
            .captures_iter(text)
            .find_map(|caps| parse_range(&caps[1], today))
    {
        dates.check_in = dates.check_in.or(range.check_in);
        dates.check_out = dates.check_out.or(range.check_out);
    }

    if dates.check_in.is_none() {
        dates.check_in = month_day(&MONTH_DAY_IN, text)
            .and_then(|(m, d, y)| resolve(m, d, y, |m, d| infer_year(m, d, today)));
    }
    if dates.check_out.is_none() {
        let check_in = dates.check_in;
        dates.check_out = month_day(&MONTH_DAY_OUT, text).and_then(|(m, d, y)| {
            resolve(m, d, y, |m, d| match check_in {
                Some(ci) => year_after(m, d, ci),
                None => infer_year(m, d, today),
            })
        });
    }

    dates
}

/// Pick the year for a yearless date relative to `today`.
///
/// Current year first; more than 30 days in the past rolls forward a year,
/// more than 240 days ahead rolls back a year.
pub fn infer_year(month: u32, day: u32, today: NaiveDate) -> Option<NaiveDate> {
    let guess = ymd(today.year(), month, day)?;
    if guess < today - Duration::days(PAST_GRACE_DAYS) {
        ymd(today.year() + 1, month, day)
    } else if guess > today + Duration::days(FUTURE_HORIZON_DAYS) {
        ymd(today.year() - 1, month, day)
    } else {
        Some(guess)
    }
}

/// Check-out year: the check-in year, bumped if that lands before check-in.
fn year_after(month: u32, day: u32, check_in: NaiveDate) -> Option<NaiveDate> {
    let same = ymd(check_in.year(), month, day)?;
    if same < check_in {
        ymd(check_in.year() + 1, month, day)
    } else {
        Some(same)
    }
}

fn resolve(
    month: u32,
    day: u32,
    year: Option<i32>,
    infer: impl FnOnce(u32, u32) -> Option<NaiveDate>,
) -> Option<NaiveDate> {
    match year {
        Some(y) => ymd(y, month, day),
        None => infer(month, day),
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|c| c[1].to_string())
}

fn parse_numeric(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%m/%d/%Y").ok()
}

/// First labeled `Month Day[, Year]` whose month word is a real month.
fn month_day(re: &Regex, text: &str) -> Option<(u32, u32, Option<i32>)> {
    re.captures_iter(text).find_map(|caps| {
        let month = month_number(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let year = caps.get(3).and_then(|y| y.as_str().parse().ok());
        Some((month, day, year))
    })
}

/// `jan`, `Jan.`, `January`, `sept` → 1..=12.
pub fn month_number(word: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let word = word.trim().trim_end_matches('.').to_lowercase();
    if word.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(&word))
        .map(|i| i as u32 + 1)
}

/// One side of a range: `01/15/2026`, `Jan 15, 2026`, `15 Jan 2026`,
/// `Thu, Jan 15`, or a bare day number (`18`) reusing the other side's month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartialDate {
    month: Option<u32>,
    day: u32,
    year: Option<i32>,
}

static NUMERIC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("static regex"));
static MONTH_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[a-z]{3,9},?\s+)?([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?(?:,?\s+(\d{4}))?$")
        .expect("static regex")
});
static DAY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[a-z]{3,9},?\s+)?(\d{1,2})\s+([a-z]{3,9})\.?(?:,?\s+(\d{4}))?$")
        .expect("static regex")
});
static DAY_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})(?:,?\s+(\d{4}))?$").expect("static regex"));

fn parse_partial(s: &str) -> Option<PartialDate> {
    let s = s.trim().trim_end_matches(['.', ',', ';']);
    if let Some(c) = NUMERIC_DATE.captures(s) {
        return Some(PartialDate {
            month: c[1].parse().ok(),
            day: c[2].parse().ok()?,
            year: c[3].parse().ok(),
        });
    }
    if let Some(c) = MONTH_FIRST.captures(s) {
        return Some(PartialDate {
            month: Some(month_number(&c[1])?),
            day: c[2].parse().ok()?,
            year: c.get(3).and_then(|y| y.as_str().parse().ok()),
        });
    }
    if let Some(c) = DAY_FIRST.captures(s) {
        return Some(PartialDate {
            month: Some(month_number(&c[2])?),
            day: c[1].parse().ok()?,
            year: c.get(3).and_then(|y| y.as_str().parse().ok()),
        });
    }
    DAY_ONLY.captures(s).and_then(|c| {
        Some(PartialDate {
            month: None,
            day: c[1].parse().ok()?,
            year: c.get(2).and_then(|y| y.as_str().parse().ok()),
        })
    })
}

/// Parse `A - B` into stay dates, sharing month/year across the two sides.
fn parse_range(expr: &str, today: NaiveDate) -> Option<StayDates> {
    let parts: Vec<&str> = RANGE_SPLIT.splitn(expr.trim(), 2).collect();
    let [left, right] = parts.as_slice() else {
        return None;
    };
    let start = parse_partial(left)?;
    let end = parse_partial(right)?;

    let start_month = start.month.or(end.month)?;
    let end_month = end.month.unwrap_or(start_month);

    let check_in = match (start.year, end.year) {
        (Some(y), _) => ymd(y, start_month, start.day),
        // "Dec 28 – Jan 2, 2027": a start month after the end month is the year before
        (None, Some(y)) if start_month > end_month => ymd(y - 1, start_month, start.day),
        (None, Some(y)) => ymd(y, start_month, start.day),
        (None, None) => infer_year(start_month, start.day, today),
    }?;
    let check_out = match end.year {
        Some(y) => ymd(y, end_month, end.day),
        None => year_after(end_month, end.day, check_in),
    };

    Some(StayDates {
        check_in: Some(check_in),
        check_out,
    })
}
