//! Platform name canonicalization.

/// Canonical names of the built-in platforms.
pub const AIRBNB: &str = "airbnb";
pub const VRBO: &str = "vrbo";
pub const BOOKING_COM: &str = "bookingcom";

/// Normalize a platform name: lower case, punctuation and spaces dropped,
/// known aliases folded (`booking.com` → `bookingcom`, `homeaway` → `vrbo`).
pub fn canonical_platform(name: &str) -> String {
    let folded: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    match folded.as_str() {
        "booking" | "bookingcom" => BOOKING_COM.to_string(),
        "homeaway" | "vrbocom" => VRBO.to_string(),
        "airbnbcom" => AIRBNB.to_string(),
        _ => folded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(canonical_platform("Booking.com"), "bookingcom");
        assert_eq!(canonical_platform("bookingcom"), "bookingcom");
        assert_eq!(canonical_platform(" booking "), "bookingcom");
        assert_eq!(canonical_platform("HomeAway"), "vrbo");
        assert_eq!(canonical_platform("Airbnb"), "airbnb");
        assert_eq!(canonical_platform("Plum Guide"), "plumguide");
    }
}
