//! # Ad / Location Registry
//!
//! Display names for the identifiers that show up in tokens. Seeded at
//! startup; lookups never block attribution, an unknown id just reports
//! without a name.

use std::collections::HashMap;

pub struct Registry {
    ads: HashMap<String, String>,
    locations: HashMap<String, String>,
}

impl Registry {
    fn new() -> Self {
        Self {
            ads: HashMap::new(),
            locations: HashMap::new(),
        }
    }

    /// Current campaign seed. Location ids are hyphen-free on purpose: the
    /// token codec reserves hyphens for ad ids and the field separator.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        for (id, name) in [
            ("fight-back", "Fight Back"),
            ("pro-working", "Pro Working"),
            ("tax-cut", "Tax Cut"),
        ] {
            registry.add_ad(id, name);
        }

        for (id, name) in [
            ("DeweySouthPoles", "Electrical poles outside South Station"),
            ("UMassBostonCampus", "Wheatley, McCormack, UHall, Campus Center, UMass Boston"),
            ("HarvardSq", "Harvard Sq."),
            ("BostonWharfs", "Boston Wharfs"),
            ("LongWharfHangout", "Long Wharf / Columbus Park: General Hangout"),
            ("RedLineStops", "Red Line Stops (Alewife, Harvard, Andrew, JFK, Quincy Center)"),
            ("RevereBeach", "Revere Beach & Shirley Ave."),
        ] {
            registry.add_location(id, name);
        }

        registry
    }

    pub fn add_ad(&mut self, id: &str, name: &str) {
        self.ads.insert(id.to_string(), name.to_string());
    }

    pub fn add_location(&mut self, id: &str, name: &str) {
        self.locations.insert(id.to_string(), name.to_string());
    }

    pub fn ad_name(&self, id: &str) -> Option<&str> {
        self.ads.get(id).map(String::as_str)
    }

    pub fn location_name(&self, id: &str) -> Option<&str> {
        self.locations.get(id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use crate::token::{valid_ad_id, valid_location_id};

    use super::Registry;

    #[test]
    fn test_lookup() {
        let registry = Registry::with_defaults();

        assert_eq!(registry.location_name("HarvardSq"), Some("Harvard Sq."));
        assert_eq!(registry.ad_name("fight-back"), Some("Fight Back"));
        assert_eq!(registry.location_name("nowhere"), None);
    }

    #[test]
    fn test_seeded_ids_fit_token_alphabets() {
        let registry = Registry::with_defaults();

        assert!(registry.ads.keys().all(|id| valid_ad_id(id)));
        assert!(registry.locations.keys().all(|id| valid_location_id(id)));
    }
}
