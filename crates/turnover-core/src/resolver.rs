//! Property resolution: (platform, listing id) → configured property.

use std::sync::Arc;

use crate::error::{Result, TurnoverError};
use crate::platform::canonical_platform;
use crate::types::Property;

/// Read-only lookup over the configured properties.
///
/// Platform keys are canonicalized once at construction. When two properties
/// claim the same (platform, id) pair the first one in configuration order
/// wins and a warning is logged.
pub struct PropertyResolver {
    properties: Vec<Arc<Property>>,
}

impl PropertyResolver {
    pub fn new(properties: Vec<Property>) -> Self {
        let properties: Vec<Arc<Property>> = properties
            .into_iter()
            .map(|mut p| {
                let mut ids = std::collections::BTreeMap::new();
                for (platform, id) in std::mem::take(&mut p.platform_ids) {
                    let canonical = canonical_platform(&platform);
                    if ids.contains_key(&canonical) {
                        tracing::warn!(
                            "⚠️ Property '{}' lists {} twice; keeping the first id",
                            p.id,
                            canonical
                        );
                        continue;
                    }
                    ids.insert(canonical, id.trim().to_string());
                }
                p.platform_ids = ids;
                Arc::new(p)
            })
            .collect();

        let resolver = Self { properties };
        resolver.warn_on_duplicates();
        resolver
    }

    /// Resolve a listing id. Missing ids are a configuration mismatch.
    pub fn resolve(&self, platform: &str, listing_id: &str) -> Result<Arc<Property>> {
        let canonical = canonical_platform(platform);
        let wanted = listing_id.trim();
        self.properties
            .iter()
            .find(|p| {
                p.platform_ids
                    .get(&canonical)
                    .is_some_and(|id| id.eq_ignore_ascii_case(wanted))
            })
            .cloned()
            .ok_or_else(|| TurnoverError::PropertyNotFound {
                platform: canonical,
                listing_id: wanted.to_string(),
                known: self.known(),
            })
    }

    /// Human-readable list of configured properties for diagnostics.
    pub fn known(&self) -> Vec<String> {
        self.properties
            .iter()
            .map(|p| {
                let ids = p
                    .platform_ids
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{} [{}]", p.id, ids)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    fn warn_on_duplicates(&self) {
        let mut seen: Vec<(String, String, &str)> = Vec::new();
        for p in &self.properties {
            for (platform, id) in &p.platform_ids {
                let lowered = id.to_lowercase();
                if let Some((_, _, owner)) = seen
                    .iter()
                    .find(|(pl, i, _)| pl == platform && *i == lowered)
                {
                    tracing::warn!(
                        "⚠️ {platform} listing '{id}' is claimed by '{owner}' and '{}'; '{owner}' wins",
                        p.id
                    );
                } else {
                    seen.push((platform.clone(), lowered, p.id.as_str()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyMetadata;
    use std::collections::BTreeMap;

    fn property(id: &str, ids: &[(&str, &str)]) -> Property {
        Property {
            id: id.into(),
            platform_ids: ids
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            address: String::new(),
            cleaners: vec![],
            metadata: PropertyMetadata::default(),
        }
    }

    #[test]
    fn test_resolve_with_alias_and_case() {
        let resolver = PropertyResolver::new(vec![
            property("loft", &[("airbnb", "12345678")]),
            property("cabin", &[("Booking.com", "AbC-77")]),
        ]);
        assert_eq!(resolver.resolve("airbnb", "12345678").unwrap().id, "loft");
        assert_eq!(resolver.resolve("bookingcom", "abc-77").unwrap().id, "cabin");
        assert_eq!(resolver.resolve("booking.com", " ABC-77 ").unwrap().id, "cabin");
    }

    #[test]
    fn test_not_found_names_known_properties() {
        let resolver = PropertyResolver::new(vec![property("loft", &[("airbnb", "1")])]);
        match resolver.resolve("vrbo", "1") {
            Err(TurnoverError::PropertyNotFound { platform, known, .. }) => {
                assert_eq!(platform, "vrbo");
                assert_eq!(known, vec!["loft [airbnb=1]".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_pair_first_wins() {
        let resolver = PropertyResolver::new(vec![
            property("first", &[("airbnb", "42")]),
            property("second", &[("airbnb", "42")]),
        ]);
        assert_eq!(resolver.resolve("airbnb", "42").unwrap().id, "first");
        assert_eq!(resolver.len(), 2);
    }
}
