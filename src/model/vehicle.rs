//! Vehicle record and its construction-time invariants
//!
//! A `Vehicle` can only be obtained by converting a `VehicleDraft`, which
//! checks every bounded and enumerated field. Deserialization goes through the
//! same conversion, so a record read back from disk obeys the same rules as a
//! freshly parsed one.

use crate::model::enums::{Category, FuelType, Transmission};
use crate::model::hash::content_hash;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Oldest accepted model year
pub const MIN_YEAR: u16 = 1950;

/// Lowest plausible listing price
pub const MIN_PRICE: f64 = 10_000.0;

/// Highest plausible listing price
pub const MAX_PRICE: f64 = 5_000_000.0;

/// Highest plausible odometer reading (km)
pub const MAX_MILEAGE: u32 = 1_000_000;

pub const MIN_DOORS: u8 = 2;
pub const MAX_DOORS: u8 = 5;

/// Mileage above which a near-new model year is suspicious
pub const RECENT_MODEL_MILEAGE_LIMIT: u32 = 100_000;

/// Newest accepted model year (next year's models are sold this year)
pub fn max_year() -> u16 {
    (Utc::now().year() + 1) as u16
}

/// Reasons a candidate record cannot become a `Vehicle`
///
/// The `Display` text is the rejection reason shown to operators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VehicleError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("{field} {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    #[error("invalid {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    #[error("malformed URL in {field}: '{value}'")]
    InvalidUrl { field: &'static str, value: String },
}

/// Candidate record assembled from normalized fields, not yet validated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleDraft {
    pub id: String,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<u16>,
    pub price: Option<f64>,
    pub mileage: Option<u32>,
    pub fuel_type: Option<FuelType>,
    pub transmission: Option<Transmission>,
    pub color: Option<String>,
    pub doors: Option<u8>,
    pub category: Option<Category>,
    #[serde(default)]
    pub images: Vec<String>,
    pub description: Option<String>,
    pub url: String,
    pub scraped_at: DateTime<Utc>,
}

impl VehicleDraft {
    /// Returns every hard invariant this draft violates, in field order
    pub fn violations(&self) -> Vec<VehicleError> {
        let mut errors = Vec::new();

        if self.id.trim().is_empty() {
            errors.push(VehicleError::InvalidValue {
                field: "id",
                message: "identifier must not be empty".to_string(),
            });
        }

        for (field, value) in [
            ("name", &self.name),
            ("brand", &self.brand),
            ("model", &self.model),
        ] {
            if value.as_deref().map(str::trim).unwrap_or("").is_empty() {
                errors.push(VehicleError::MissingField(field));
            }
        }

        match self.year {
            None => errors.push(VehicleError::MissingField("year")),
            Some(year) => {
                if let Err(e) = check_year(year) {
                    errors.push(e);
                }
            }
        }

        match self.price {
            None => errors.push(VehicleError::MissingField("price")),
            Some(price) => {
                if let Err(e) = check_price(price) {
                    errors.push(e);
                }
            }
        }

        match self.mileage {
            None => errors.push(VehicleError::MissingField("mileage")),
            Some(mileage) => {
                if let Err(e) = check_mileage(mileage) {
                    errors.push(e);
                }
            }
        }

        if self.fuel_type.is_none() {
            errors.push(VehicleError::MissingField("fuel_type"));
        }
        if self.transmission.is_none() {
            errors.push(VehicleError::MissingField("transmission"));
        }
        if self.category.is_none() {
            errors.push(VehicleError::MissingField("category"));
        }

        if let Some(doors) = self.doors {
            if let Err(e) = check_doors(doors) {
                errors.push(e);
            }
        }

        if !is_http_url(&self.url) {
            errors.push(VehicleError::InvalidUrl {
                field: "url",
                value: self.url.clone(),
            });
        }

        errors
    }
}

pub(crate) fn check_year(year: u16) -> Result<(), VehicleError> {
    let max = max_year();
    if (MIN_YEAR..=max).contains(&year) {
        Ok(())
    } else {
        Err(VehicleError::OutOfRange {
            field: "year",
            value: year.to_string(),
            min: MIN_YEAR.to_string(),
            max: max.to_string(),
        })
    }
}

pub(crate) fn check_price(price: f64) -> Result<(), VehicleError> {
    if price.is_finite() && (MIN_PRICE..=MAX_PRICE).contains(&price) {
        Ok(())
    } else {
        Err(VehicleError::OutOfRange {
            field: "price",
            value: format!("{:.2}", price),
            min: format!("{:.2}", MIN_PRICE),
            max: format!("{:.2}", MAX_PRICE),
        })
    }
}

pub(crate) fn check_mileage(mileage: u32) -> Result<(), VehicleError> {
    if mileage <= MAX_MILEAGE {
        Ok(())
    } else {
        Err(VehicleError::OutOfRange {
            field: "mileage",
            value: mileage.to_string(),
            min: "0".to_string(),
            max: MAX_MILEAGE.to_string(),
        })
    }
}

pub(crate) fn check_doors(doors: u8) -> Result<(), VehicleError> {
    if (MIN_DOORS..=MAX_DOORS).contains(&doors) {
        Ok(())
    } else {
        Err(VehicleError::OutOfRange {
            field: "doors",
            value: doors.to_string(),
            min: MIN_DOORS.to_string(),
            max: MAX_DOORS.to_string(),
        })
    }
}

/// Returns true for absolute URLs with an http or https scheme and a host
pub fn is_http_url(raw: &str) -> bool {
    match Url::parse(raw.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Keeps unique, well-formed absolute HTTP(S) image URLs in original order
pub fn sanitize_images(images: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    images
        .iter()
        .map(|raw| raw.trim())
        .filter(|raw| is_http_url(raw))
        .filter(|raw| seen.insert(raw.to_string()))
        .map(str::to_string)
        .collect()
}

/// One listing snapshot
///
/// Immutable once constructed. A changed listing produces a new `Vehicle`
/// with the same `id` and a different `content_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VehicleDraft")]
pub struct Vehicle {
    id: String,
    name: String,
    brand: String,
    model: String,
    year: u16,
    price: f64,
    mileage: u32,
    fuel_type: FuelType,
    transmission: Transmission,
    color: Option<String>,
    doors: Option<u8>,
    category: Category,
    images: Vec<String>,
    description: Option<String>,
    url: String,
    scraped_at: DateTime<Utc>,
    content_hash: String,
}

impl TryFrom<VehicleDraft> for Vehicle {
    type Error = VehicleError;

    fn try_from(draft: VehicleDraft) -> Result<Self, Self::Error> {
        if let Some(first) = draft.violations().into_iter().next() {
            return Err(first);
        }

        let missing = VehicleError::MissingField;
        let mut vehicle = Vehicle {
            id: draft.id.trim().to_string(),
            name: draft.name.ok_or(missing("name"))?.trim().to_string(),
            brand: draft.brand.ok_or(missing("brand"))?.trim().to_string(),
            model: draft.model.ok_or(missing("model"))?.trim().to_string(),
            year: draft.year.ok_or(missing("year"))?,
            price: draft.price.ok_or(missing("price"))?,
            mileage: draft.mileage.ok_or(missing("mileage"))?,
            fuel_type: draft.fuel_type.ok_or(missing("fuel_type"))?,
            transmission: draft.transmission.ok_or(missing("transmission"))?,
            color: non_blank(draft.color),
            doors: draft.doors,
            category: draft.category.ok_or(missing("category"))?,
            images: sanitize_images(&draft.images),
            description: non_blank(draft.description),
            url: draft.url.trim().to_string(),
            scraped_at: draft.scraped_at,
            content_hash: String::new(),
        };
        vehicle.content_hash = content_hash(&vehicle);

        Ok(vehicle)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Vehicle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn mileage(&self) -> u32 {
        self.mileage
    }

    pub fn fuel_type(&self) -> FuelType {
        self.fuel_type
    }

    pub fn transmission(&self) -> Transmission {
        self.transmission
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn doors(&self) -> Option<u8> {
        self.doors
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn scraped_at(&self) -> DateTime<Utc> {
        self.scraped_at
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Soft invariant: a near-new model year with very high mileage
    pub fn has_suspicious_mileage(&self) -> bool {
        suspicious_mileage(self.year, self.mileage)
    }

    /// Summary stored next to the hash in the vehicle ledger
    pub fn ledger_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "url": self.url,
            "brand": self.brand,
            "model": self.model,
            "year": self.year,
            "price": self.price,
        })
    }
}

/// Only meaningful for in-range years; out-of-range years are hard errors instead
pub(crate) fn suspicious_mileage(year: u16, mileage: u32) -> bool {
    if check_year(year).is_err() {
        return false;
    }
    let current = Utc::now().year() as u16;
    year.saturating_add(1) >= current && mileage > RECENT_MODEL_MILEAGE_LIMIT
}
