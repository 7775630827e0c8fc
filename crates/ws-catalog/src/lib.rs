use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use ws_api_types::Flight;

/// Entries in the upstream dataset are wrapped in a `flight` object.
#[derive(Debug, Deserialize)]
struct FlightEntry {
    flight: Flight,
}

/// Static flight dataset with departure-city filtering and exact lookup.
///
/// The catalog is immutable once loaded; unknown cities and flight numbers
/// produce empty results, never errors.
pub struct FlightCatalog {
    flights: Vec<Flight>,
}

impl FlightCatalog {
    /// Catalog bundled with the crate.
    pub fn builtin() -> Self {
        // The embedded dataset is validated by tests, so a parse failure here
        // is a build defect.
        Self::from_json_str(include_str!("../data/flights.json"))
            .unwrap_or(Self { flights: Vec::new() })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: Vec<FlightEntry> =
            serde_json::from_str(json).context("failed to parse flight dataset")?;
        Ok(Self {
            flights: entries.into_iter().map(|entry| entry.flight).collect(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read flight dataset: {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flight> {
        self.flights.iter()
    }

    /// Unique departure cities in first-seen order, empty names dropped.
    pub fn cities(&self) -> Vec<String> {
        let mut cities: Vec<String> = Vec::new();
        for flight in &self.flights {
            let city = flight.departure.airport.city.as_str();
            if city.is_empty() {
                continue;
            }
            if !cities.iter().any(|existing| existing == city) {
                cities.push(city.to_owned());
            }
        }
        cities
    }

    /// All flights departing from `city`. Case-sensitive exact match.
    pub fn flights_from(&self, city: &str) -> Vec<Flight> {
        self.flights
            .iter()
            .filter(|flight| flight.departure.airport.city == city)
            .cloned()
            .collect()
    }

    pub fn find(&self, flight_number: &str) -> Option<&Flight> {
        self.flights
            .iter()
            .find(|flight| flight.flight_number == flight_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_dataset_parses() {
        let catalog = FlightCatalog::builtin();
        assert!(!catalog.is_empty());
        assert!(catalog.find("AI101").is_some());
    }

    #[test]
    fn cities_are_unique_and_in_first_seen_order() {
        let catalog = FlightCatalog::builtin();
        let cities = catalog.cities();

        assert_eq!(cities.first().map(String::as_str), Some("Delhi"));
        for city in &cities {
            assert_eq!(cities.iter().filter(|entry| *entry == city).count(), 1);
        }
    }

    #[test]
    fn unknown_city_yields_empty_list() {
        let catalog = FlightCatalog::builtin();
        assert!(catalog.flights_from("Atlantis").is_empty());
    }

    #[test]
    fn city_match_is_case_sensitive() {
        let catalog = FlightCatalog::builtin();
        assert!(!catalog.flights_from("Delhi").is_empty());
        assert!(catalog.flights_from("delhi").is_empty());
    }

    #[test]
    fn flights_from_only_returns_matching_departures() {
        let catalog = FlightCatalog::builtin();
        for flight in catalog.flights_from("Mumbai") {
            assert_eq!(flight.departure.airport.city, "Mumbai");
        }
    }

    #[test]
    fn find_returns_none_for_unknown_flight() {
        let catalog = FlightCatalog::builtin();
        assert!(catalog.find("ZZ999").is_none());
    }

    #[test]
    fn malformed_dataset_is_an_error_not_a_panic() {
        assert!(FlightCatalog::from_json_str("{not json").is_err());
    }
}
