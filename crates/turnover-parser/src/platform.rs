//! Platform profiles: per-platform detection and extraction rules as data.

use regex::Regex;
use turnover_core::platform::{AIRBNB, BOOKING_COM, VRBO};
use turnover_core::{Result, TurnoverError};

use crate::rules::ExtractionRule;

/// Fields a platform may require before a parse counts as a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Reference,
    Property,
    CheckIn,
    CheckOut,
    GuestName,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Property => "property",
            Self::CheckIn => "check-in",
            Self::CheckOut => "check-out",
            Self::GuestName => "guest name",
        }
    }
}

/// Everything the parser knows about one booking platform.
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    /// Canonical platform name.
    pub name: String,
    /// Sender address substrings (the allow-list).
    pub sender_domains: Vec<String>,
    /// Subject/body heuristics used when the sender is unknown.
    pub fingerprints: Vec<ExtractionRule>,
    /// Shape of this platform's confirmation code, for the content gate.
    pub code_shape: ExtractionRule,
    pub reference_rules: Vec<ExtractionRule>,
    /// Explicit listing ids. Tried before the free-text name heuristic.
    pub listing_rules: Vec<ExtractionRule>,
    pub guest_rules: Vec<ExtractionRule>,
    pub subject_guest_rules: Vec<ExtractionRule>,
    pub required: Vec<Field>,
}

/// Two capitalized tokens, e.g. `Jane Doe`, `Mary-Kate O'Neil`, `Hans Müller`.
const PROPER_NAME: &str = r"(\p{Lu}[\p{L}'\-]+[ \t]+\p{Lu}[\p{L}'\-]+)";

fn rule(name: &str, pattern: &str) -> Result<ExtractionRule> {
    ExtractionRule::new(name, pattern)
}

fn rules(defs: &[(&str, &str)]) -> Result<Vec<ExtractionRule>> {
    defs.iter().map(|(n, p)| rule(n, p)).collect()
}

impl PlatformProfile {
    /// Built-in platforms in detection priority order.
    pub fn builtin() -> Result<Vec<Self>> {
        Ok(vec![Self::airbnb()?, Self::vrbo()?, Self::booking_com()?])
    }

    pub fn airbnb() -> Result<Self> {
        Ok(Self {
            name: AIRBNB.into(),
            sender_domains: vec!["airbnb.com".into()],
            fingerprints: rules(&[
                ("airbnb-word", r"(?i)\bairbnb\b"),
                ("hm-code", r"\bHM[A-Z0-9]{8,10}\b"),
            ])?,
            code_shape: rule("hm-code", r"\b(HM[A-Z0-9]{8,10})\b")?,
            reference_rules: rules(&[
                (
                    "labeled-code",
                    r"(?i:confirmation|reservation)[ \t]+(?i:code|number|#)[ \t]*:?\s*([A-Z0-9]{8,12})\b",
                ),
                ("hm-code", r"\b(HM[A-Z0-9]{8,10})\b"),
            ])?,
            listing_rules: rules(&[
                (
                    "listing-id",
                    r"\b(?i:listing|unit|property|room)(?:[ \t]+(?i:id|number|#))?[ \t]*:?[ \t]*#?(\d{5,})\b",
                ),
                ("rooms-url", r"airbnb\.[a-z.]+/rooms/(\d{5,})"),
            ])?,
            guest_rules: rules(&[(
                "guest-label",
                &format!(r"(?i:guest)(?:[ \t]+(?i:name))?[ \t]*:[ \t]*{PROPER_NAME}"),
            )])?,
            subject_guest_rules: rules(&[
                (
                    "confirmed-arrives",
                    &format!(r"(?i:reservation confirmed)[ \t]*[-–:][ \t]*{PROPER_NAME}"),
                ),
                ("name-arrives", &format!(r"{PROPER_NAME}[ \t]+(?i:arrives)")),
            ])?,
            required: vec![Field::Reference, Field::Property],
        })
    }

    pub fn vrbo() -> Result<Self> {
        Ok(Self {
            name: VRBO.into(),
            sender_domains: vec!["vrbo.com".into(), "homeaway.com".into()],
            fingerprints: rules(&[
                ("vrbo-word", r"(?i)\b(?:vrbo|homeaway)\b"),
                ("ha-code", r"\bHA-[A-Z0-9]{6,10}\b"),
            ])?,
            code_shape: rule("ha-code", r"\b(HA-[A-Z0-9]{6,10})\b")?,
            reference_rules: rules(&[
                ("ha-code", r"\b(HA-[A-Z0-9]{6,10})\b"),
                (
                    "labeled-code",
                    r"(?i:reservation|confirmation)[ \t]+(?i:id|code|number|#)[ \t]*:?\s*([A-Z0-9-]{8,12})\b",
                ),
            ])?,
            listing_rules: rules(&[
                (
                    "property-id",
                    r"\b(?i:property|listing|unit)(?:[ \t]+(?i:id|number|#))?[ \t]*:?[ \t]*#?(\d{5,})\b",
                ),
                ("listing-url", r"vrbo\.com/(\d{5,})"),
            ])?,
            guest_rules: rules(&[(
                "traveler-label",
                &format!(r"(?i:traveler|guest)(?:[ \t]+(?i:name))?[ \t]*:[ \t]*{PROPER_NAME}"),
            )])?,
            subject_guest_rules: rules(&[(
                "booking-from",
                &format!(r"(?i:booking|reservation)[ \t]+(?i:from)[ \t]+{PROPER_NAME}"),
            )])?,
            required: vec![Field::Reference, Field::Property],
        })
    }

    pub fn booking_com() -> Result<Self> {
        Ok(Self {
            name: BOOKING_COM.into(),
            sender_domains: vec!["booking.com".into()],
            fingerprints: rules(&[
                ("booking-domain", r"(?i)\bbooking\.com\b"),
                ("booking-number", r"(?i)\bbooking[ \t]+number\b"),
            ])?,
            code_shape: rule("booking-number", r"\b(\d{9,12})\b")?,
            reference_rules: rules(&[(
                "booking-number",
                r"(?i:booking|confirmation|reservation)[ \t]+(?i:number|id|no\.?)[ \t]*:?\s*(\d{9,12})\b",
            )])?,
            listing_rules: rules(&[
                (
                    "property-id",
                    r"\b(?i:property|hotel|listing|unit)[ \t]+(?i:id|number)[ \t]*:?[ \t]*(\d{5,})\b",
                ),
                ("hotel-id-param", r"hotel_id=(\d{5,})"),
            ])?,
            guest_rules: rules(&[(
                "guest-label",
                &format!(r"(?i:guest|booker)(?:[ \t]+(?i:name))?[ \t]*:[ \t]*{PROPER_NAME}"),
            )])?,
            subject_guest_rules: rules(&[(
                "new-booking-from",
                &format!(r"(?i:new booking)(?:[ \t]+(?i:from)|[ \t]*[-–:])[ \t]*{PROPER_NAME}"),
            )])?,
            required: vec![Field::Reference, Field::Property],
        })
    }

    /// Add sender domains from configuration.
    pub fn with_sender_domains(mut self, domains: &[String]) -> Self {
        self.add_sender_domains(domains);
        self
    }

    pub fn add_sender_domains(&mut self, domains: &[String]) {
        for domain in domains {
            let domain = domain.trim().to_lowercase();
            if !domain.is_empty() && !self.sender_domains.contains(&domain) {
                self.sender_domains.push(domain);
            }
        }
    }

    /// Sender allow-list match.
    pub fn matches_sender(&self, from: &str) -> bool {
        let from = from.to_lowercase();
        self.sender_domains.iter().any(|d| from.contains(d.as_str()))
    }

    /// Subject/body heuristic match.
    pub fn matches_content(&self, text: &str) -> bool {
        self.fingerprints.iter().any(|f| f.matches(text))
    }

    /// Custom profile from raw patterns, e.g. for a platform added in config.
    pub fn custom(name: &str, sender_domains: &[&str], code_pattern: &str) -> Result<Self> {
        let code = Regex::new(code_pattern)
            .map_err(|e| TurnoverError::Config(format!("platform '{name}': {e}")))?;
        let captured = if code.captures_len() > 1 {
            code_pattern.to_string()
        } else {
            format!("({code_pattern})")
        };
        Ok(Self {
            name: turnover_core::platform::canonical_platform(name),
            sender_domains: sender_domains.iter().map(|d| d.to_lowercase()).collect(),
            fingerprints: vec![rule("code", &captured)?],
            code_shape: rule("code", &captured)?,
            reference_rules: vec![rule("code", &captured)?],
            listing_rules: rules(&[(
                "listing-id",
                r"\b(?i:listing|unit|property)(?:[ \t]+(?i:id|number|#))?[ \t]*:?[ \t]*#?(\d{4,})\b",
            )])?,
            guest_rules: rules(&[(
                "guest-label",
                &format!(r"(?i:guest)(?:[ \t]+(?i:name))?[ \t]*:[ \t]*{PROPER_NAME}"),
            )])?,
            subject_guest_rules: vec![],
            required: vec![Field::Reference, Field::Property],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::first_match;

    #[test]
    fn test_builtin_profiles_compile() {
        let profiles = PlatformProfile::builtin().unwrap();
        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["airbnb", "vrbo", "bookingcom"]);
    }

    #[test]
    fn test_sender_allow_list() {
        let vrbo = PlatformProfile::vrbo()
            .unwrap()
            .with_sender_domains(&["VrboMail.net".into()]);
        assert!(vrbo.matches_sender("noreply@messages.homeaway.com"));
        assert!(vrbo.matches_sender("x@vrbomail.net"));
        assert!(!vrbo.matches_sender("x@airbnb.com"));
    }

    #[test]
    fn test_airbnb_reference_label_before_bare_code() {
        let airbnb = PlatformProfile::airbnb().unwrap();
        let text = "Ref HMAAAAAAAA1\nConfirmation code: HMZZ99ZZ99";
        let (name, code) = first_match(&airbnb.reference_rules, text).unwrap();
        assert_eq!(name, "labeled-code");
        assert_eq!(code, "HMZZ99ZZ99");
    }

    #[test]
    fn test_booking_com_rules() {
        let profile = PlatformProfile::booking_com().unwrap();
        let text = "Booking number: 4012345678\nProperty ID: 7654321\nGuest name: Hans Müller";
        assert_eq!(
            first_match(&profile.reference_rules, text).map(|m| m.1),
            Some("4012345678".into())
        );
        assert_eq!(
            first_match(&profile.listing_rules, text).map(|m| m.1),
            Some("7654321".into())
        );
    }

    #[test]
    fn test_custom_profile_wraps_pattern() {
        let profile = PlatformProfile::custom("Plum Guide", &["plumguide.com"], r"PG\d{6}").unwrap();
        assert_eq!(profile.name, "plumguide");
        assert_eq!(
            first_match(&profile.reference_rules, "code PG123456").map(|m| m.1),
            Some("PG123456".into())
        );
        assert!(PlatformProfile::custom("bad", &[], "(").is_err());
    }
}
