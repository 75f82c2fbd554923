//! Message bodies and iCalendar payloads. Pure functions, no transport.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use turnover_core::traits::{CalendarInvite, CleanerRequest, ExhaustedNotice};

const ICS_LINE_OCTETS: usize = 75;

/// Render an instant in the property's zone, e.g. `Sun Jan 18 2026, 11:00 EST`.
pub fn local_time(at: DateTime<Utc>, timezone: &str) -> String {
    let tz: Tz = timezone.trim().parse().unwrap_or(Tz::UTC);
    at.with_timezone(&tz)
        .format("%a %b %-d %Y, %H:%M %Z")
        .to_string()
}

fn date_or_unknown(date: Option<chrono::NaiveDate>) -> String {
    date.map(|d| d.format("%a %b %-d %Y").to_string())
        .unwrap_or_else(|| "unknown".into())
}

pub fn cleaner_request_subject(request: &CleanerRequest) -> String {
    format!(
        "Cleaning request: {} on {}",
        request.property_name,
        local_time(request.cleaning_at, &request.timezone)
    )
}

pub fn cleaner_request_text(request: &CleanerRequest) -> String {
    let b = &request.booking;
    format!(
        "Hi {name},\n\n\
         Can you clean {property} after the guests check out?\n\n\
         When:     {when}\n\
         Where:    {address}\n\
         Guests:   {guests} ({guest_name}), {check_in} to {check_out}\n\
         Booking:  {platform} {reference}\n\n\
         Yes, I can do it: {accept}\n\
         No, I can't:      {decline}\n\n\
         If we don't hear back we'll ask the next cleaner on the list.\n",
        name = request.cleaner.name,
        property = request.property_name,
        when = local_time(request.cleaning_at, &request.timezone),
        address = request.address,
        guests = b.guests,
        guest_name = if b.guest_name.is_empty() { "guest" } else { b.guest_name.as_str() },
        check_in = date_or_unknown(b.check_in),
        check_out = date_or_unknown(b.check_out),
        platform = b.platform,
        reference = b.reference,
        accept = request.accept_url,
        decline = request.decline_url,
    )
}

pub fn cleaner_request_html(request: &CleanerRequest) -> String {
    format!(
        "<p>Hi {name},</p>\
         <p>Can you clean <b>{property}</b> on <b>{when}</b>?</p>\
         <p>{address}</p>\
         <p><a href=\"{accept}\">Yes, I can do it</a> &nbsp;|&nbsp; \
         <a href=\"{decline}\">No, I can't</a></p>",
        name = html_escape(&request.cleaner.name),
        property = html_escape(&request.property_name),
        when = html_escape(&local_time(request.cleaning_at, &request.timezone)),
        address = html_escape(&request.address),
        accept = html_escape(&request.accept_url),
        decline = html_escape(&request.decline_url),
    )
}

pub fn invite_subject(invite: &CalendarInvite) -> String {
    format!("Confirmed: cleaning at {}", invite.property_name)
}

pub fn invite_text(invite: &CalendarInvite) -> String {
    format!(
        "Thanks {name}, you're booked to clean {property}.\n\n\
         Starts:   {starts} (UTC)\n\
         Duration: {mins} minutes\n\
         Address:  {address}\n\n\
         {notes}\n",
        name = invite.cleaner.name,
        property = invite.property_name,
        starts = invite.starts_at.format("%a %b %-d %Y, %H:%M"),
        mins = invite.duration_mins,
        address = invite.address,
        notes = invite.notes,
    )
}

pub fn exhausted_subject(notice: &ExhaustedNotice) -> String {
    format!("No cleaner found for {}", notice.property_name)
}

pub fn exhausted_text(notice: &ExhaustedNotice) -> String {
    let mut out = format!(
        "Hi {},\n\nNobody accepted the cleaning at {} on {} ({} {}, guest {}, checkout {}).\n\n",
        if notice.owner_name.is_empty() { "there" } else { notice.owner_name.as_str() },
        notice.property_name,
        notice.cleaning_at.format("%Y-%m-%d %H:%M UTC"),
        notice.booking.platform,
        notice.booking.reference,
        notice.booking.guest_name,
        date_or_unknown(notice.booking.check_out),
    );
    if notice.attempted.is_empty() {
        out.push_str("No cleaners are configured for this property.\n");
    } else {
        out.push_str("Cleaners contacted:\n");
        for attempt in &notice.attempted {
            out.push_str(&format!(
                "  - {} <{}>: {}\n",
                attempt.cleaner_name,
                attempt.cleaner_email,
                attempt.outcome.label()
            ));
        }
    }
    out.push_str("\nPlease arrange the cleaning yourself.\n");
    out
}

/// RFC 5545 `REQUEST` for a confirmed cleaning. `stamp` is DTSTAMP.
pub fn calendar_ics(invite: &CalendarInvite, organizer: &str, stamp: DateTime<Utc>) -> String {
    let ends_at = invite.starts_at + chrono::Duration::minutes(invite.duration_mins as i64);
    let organizer_name = if invite.owner_name.is_empty() {
        organizer
    } else {
        invite.owner_name.as_str()
    };

    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".into(),
        "PRODID:-//Turnover//Cleaning Coordination//EN".into(),
        "CALSCALE:GREGORIAN".into(),
        "METHOD:REQUEST".into(),
        "BEGIN:VEVENT".into(),
        format!("UID:{}", invite.uid),
        format!("DTSTAMP:{}", ics_time(stamp)),
        format!("DTSTART:{}", ics_time(invite.starts_at)),
        format!("DTEND:{}", ics_time(ends_at)),
        format!("SUMMARY:{}", ics_escape(&format!("Cleaning: {}", invite.property_name))),
        format!("LOCATION:{}", ics_escape(&invite.address)),
        format!("DESCRIPTION:{}", ics_escape(&invite.notes)),
        format!(
            "ORGANIZER;CN=\"{}\":mailto:{}",
            param_value(organizer_name),
            organizer
        ),
        format!(
            "ATTENDEE;CN=\"{}\";ROLE=REQ-PARTICIPANT;PARTSTAT=ACCEPTED:mailto:{}",
            param_value(&invite.cleaner.name),
            invite.cleaner.email
        ),
        "SEQUENCE:0".into(),
        "STATUS:CONFIRMED".into(),
        "END:VEVENT".into(),
        "END:VCALENDAR".into(),
    ];

    let mut out = String::new();
    for line in &lines {
        out.push_str(&fold(line));
        out.push_str("\r\n");
    }
    out
}

fn ics_time(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn ics_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(ch),
        }
    }
    out
}

/// Quoted parameter values cannot contain DQUOTE or control characters.
fn param_value(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '"' && !c.is_control())
        .collect()
}

/// Fold at 75 octets without splitting a UTF-8 sequence.
fn fold(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    let mut width = 0;
    for ch in line.chars() {
        let len = ch.len_utf8();
        if width + len > ICS_LINE_OCTETS {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(ch);
        width += len;
    }
    out
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use turnover_core::{AttemptOutcome, AttemptRecord, Booking, CleanerContact};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn booking() -> Booking {
        Booking {
            platform: "airbnb".into(),
            reference: "HM123456789".into(),
            property_id: "12345678".into(),
            check_in: NaiveDate::from_ymd_opt(2026, 1, 15),
            check_out: NaiveDate::from_ymd_opt(2026, 1, 18),
            guest_name: "Jane Doe".into(),
            guests: 2,
            source_digest: String::new(),
        }
    }

    fn alice() -> CleanerContact {
        CleanerContact {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            phone: "555-0100".into(),
            rank: 1,
        }
    }

    fn invite() -> CalendarInvite {
        CalendarInvite {
            uid: "abc@turnover".into(),
            cleaner: alice(),
            owner_name: "Olivia".into(),
            owner_email: Some("olivia@example.com".into()),
            property_name: "Harbor Loft".into(),
            address: "1 Main St, Apt 2".into(),
            starts_at: utc("2026-01-18T16:00:00Z"),
            duration_mins: 180,
            booking: booking(),
            notes: "Checkout Jan 18; 2 guests\nAccess: lockbox 4321".into(),
        }
    }

    #[test]
    fn test_ics_event() {
        let ics = calendar_ics(&invite(), "host@example.com", utc("2026-01-10T09:00:00Z"));
        let ics = ics.replace("\r\n ", "");
        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.ends_with("END:VCALENDAR\r\n"));
        assert!(ics.contains("UID:abc@turnover\r\n"));
        assert!(ics.contains("DTSTAMP:20260110T090000Z\r\n"));
        assert!(ics.contains("DTSTART:20260118T160000Z\r\n"));
        assert!(ics.contains("DTEND:20260118T190000Z\r\n"));
        assert!(ics.contains("LOCATION:1 Main St\\, Apt 2\r\n"));
        assert!(ics.contains("DESCRIPTION:Checkout Jan 18\\; 2 guests\\nAccess: lockbox 4321\r\n"));
        assert!(ics.contains("ORGANIZER;CN=\"Olivia\":mailto:host@example.com"));
        assert!(ics.contains("mailto:alice@example.com"));
    }

    #[test]
    fn test_ics_lines_folded() {
        let mut long = invite();
        long.notes = "é".repeat(120);
        let ics = calendar_ics(&long, "host@example.com", utc("2026-01-10T09:00:00Z"));
        for line in ics.split("\r\n") {
            assert!(line.len() <= 75, "{} octets: {line}", line.len());
        }
        let unfolded = ics.replace("\r\n ", "");
        assert!(unfolded.contains(&format!("DESCRIPTION:{}", "é".repeat(120))));
    }

    #[test]
    fn test_cleaner_request_carries_both_links() {
        let request = CleanerRequest {
            cleaner: alice(),
            booking: booking(),
            property_name: "Harbor <Loft>".into(),
            address: "1 Main St".into(),
            cleaning_at: utc("2026-01-18T16:00:00Z"),
            timezone: "America/New_York".into(),
            accept_url: "http://x/api/v1/respond?token=t1&response=yes".into(),
            decline_url: "http://x/api/v1/respond?token=t1&response=no".into(),
            attempt: 1,
        };
        let text = cleaner_request_text(&request);
        assert!(text.contains("response=yes"));
        assert!(text.contains("response=no"));
        assert!(text.contains("Sun Jan 18 2026, 11:00 EST"));
        assert!(cleaner_request_subject(&request).contains("11:00 EST"));

        let html = cleaner_request_html(&request);
        assert!(html.contains("Harbor &lt;Loft&gt;"));
        assert!(html.contains("token=t1&amp;response=yes"));
    }

    #[test]
    fn test_exhausted_lists_attempts() {
        let notice = ExhaustedNotice {
            owner_name: "Olivia".into(),
            owner_email: None,
            property_name: "Harbor Loft".into(),
            booking: booking(),
            cleaning_at: utc("2026-01-18T16:00:00Z"),
            attempted: vec![
                AttemptRecord {
                    cleaner_name: "Alice".into(),
                    cleaner_email: "alice@example.com".into(),
                    outcome: AttemptOutcome::Declined,
                },
                AttemptRecord {
                    cleaner_name: "Bob".into(),
                    cleaner_email: "bob@example.com".into(),
                    outcome: AttemptOutcome::TimedOut,
                },
            ],
        };
        let text = exhausted_text(&notice);
        assert!(text.contains("Alice <alice@example.com>: declined"));
        assert!(text.contains("Bob <bob@example.com>: no response"));
        assert!(text.contains("HM123456789"));
    }

    #[test]
    fn test_local_time_unknown_zone_falls_back_to_utc() {
        assert_eq!(
            local_time(utc("2026-01-18T16:00:00Z"), "Nowhere/Special"),
            "Sun Jan 18 2026, 16:00 UTC"
        );
    }
}
