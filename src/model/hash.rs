//! Content hashing for change detection
//!
//! The digest covers every semantic field of a record and nothing else: the
//! identifier, the scrape timestamp and the hash itself are excluded. Fields
//! are fed to SHA-256 in a fixed (alphabetical) order with explicit
//! separators, so equal content always produces an equal digest.

use crate::model::vehicle::Vehicle;
use sha2::{Digest, Sha256};

const FIELD_SEPARATOR: u8 = 0x1f;
const RECORD_SEPARATOR: u8 = 0x1e;
const LIST_SEPARATOR: &str = "\u{1d}";
const ABSENT: &str = "\u{0}";

/// Computes the hex-encoded SHA-256 content hash of a vehicle
pub fn content_hash(vehicle: &Vehicle) -> String {
    let optional = |value: Option<&str>| value.unwrap_or(ABSENT).to_string();

    let fields: [(&str, String); 14] = [
        ("brand", vehicle.brand().to_string()),
        ("category", vehicle.category().as_str().to_string()),
        ("color", optional(vehicle.color())),
        ("description", optional(vehicle.description())),
        (
            "doors",
            vehicle
                .doors()
                .map(|d| d.to_string())
                .unwrap_or_else(|| ABSENT.to_string()),
        ),
        ("fuel_type", vehicle.fuel_type().as_str().to_string()),
        ("images", vehicle.images().join(LIST_SEPARATOR)),
        ("mileage", vehicle.mileage().to_string()),
        ("model", vehicle.model().to_string()),
        ("name", vehicle.name().to_string()),
        ("price", format!("{:.2}", vehicle.price())),
        ("transmission", vehicle.transmission().as_str().to_string()),
        ("url", vehicle.url().to_string()),
        ("year", vehicle.year().to_string()),
    ];

    let mut hasher = Sha256::new();
    for (name, value) in fields.iter() {
        hasher.update(name.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(value.as_bytes());
        hasher.update([RECORD_SEPARATOR]);
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use crate::model::enums::Category;
    use crate::model::vehicle::tests::sample_draft;
    use crate::model::vehicle::Vehicle;
    use chrono::{Duration, Utc};

    #[test]
    fn test_hash_ignores_identity_and_timestamp() {
        let first = Vehicle::try_from(sample_draft()).unwrap();

        let mut draft = sample_draft();
        draft.id = "99999".to_string();
        draft.scraped_at = Utc::now() + Duration::days(3);
        let second = Vehicle::try_from(draft).unwrap();

        assert_eq!(first.content_hash(), second.content_hash());
    }

    #[test]
    fn test_hash_changes_with_any_semantic_field() {
        let base = Vehicle::try_from(sample_draft()).unwrap();

        let mutations: Vec<Box<dyn Fn(&mut crate::model::VehicleDraft)>> = vec![
            Box::new(|d| d.name = Some("Honda Civic LX".to_string())),
            Box::new(|d| d.brand = Some("Toyota".to_string())),
            Box::new(|d| d.model = Some("Corolla".to_string())),
            Box::new(|d| d.year = Some(2021)),
            Box::new(|d| d.price = Some(94990.0)),
            Box::new(|d| d.mileage = Some(50001)),
            Box::new(|d| d.fuel_type = Some(crate::model::FuelType::Gasoline)),
            Box::new(|d| d.transmission = Some(crate::model::Transmission::Manual)),
            Box::new(|d| d.color = None),
            Box::new(|d| d.doors = Some(2)),
            Box::new(|d| d.category = Some(Category::Hatch)),
            Box::new(|d| d.images.push("https://cdn.example.com/9.jpg".to_string())),
            Box::new(|d| d.description = Some("Dois donos".to_string())),
            Box::new(|d| d.url = "https://www.example.com/carros/54321".to_string()),
        ];

        for (index, mutate) in mutations.iter().enumerate() {
            let mut draft = sample_draft();
            mutate(&mut draft);
            let changed = Vehicle::try_from(draft).unwrap();
            assert_ne!(
                base.content_hash(),
                changed.content_hash(),
                "mutation {} did not change the hash",
                index
            );
        }
    }

    #[test]
    fn test_hash_is_fixed_length_hex() {
        let vehicle = Vehicle::try_from(sample_draft()).unwrap();
        let hash = vehicle.content_hash();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
