//! Field normalization
//!
//! Raw field text in, typed and range-checked values out. Every `extract_*`
//! function returns `None` rather than an error: an unusable value is simply a
//! missing field, and record validation decides whether that matters.

use crate::config::SelectorConfig;
use crate::model::{
    max_year, sanitize_images, Category, FuelType, Transmission, VehicleDraft, MAX_DOORS,
    MAX_MILEAGE, MIN_DOORS, MIN_YEAR,
};
use crate::parser::RawVehicle;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Lowest amount accepted as a price candidate
///
/// Below the record minimum, so a cheap listing is still extracted and then
/// rejected with a range reason rather than a missing-field reason.
pub const PRICE_SCAN_MIN: f64 = 1_000.0;

/// Highest amount accepted as a price candidate
pub const PRICE_SCAN_MAX: f64 = 50_000_000.0;

/// Converts raw field text into typed values using the selector document's
/// patterns, separators and mapping tables
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    selectors: Arc<SelectorConfig>,
}

impl FieldExtractor {
    pub fn new(selectors: Arc<SelectorConfig>) -> Self {
        Self { selectors }
    }

    /// Parses a locale-formatted number such as `95.990,00`
    pub fn parse_number(&self, text: &str) -> Option<f64> {
        let patterns = &self.selectors.patterns;
        let token = numeric_tokens(text, patterns.thousands_separator, patterns.decimal_separator)
            .into_iter()
            .next()?;
        self.parse_token(token)
    }

    fn parse_token(&self, token: &str) -> Option<f64> {
        let patterns = &self.selectors.patterns;
        let normalized: String = token
            .chars()
            .filter(|c| *c != patterns.thousands_separator)
            .map(|c| if c == patterns.decimal_separator { '.' } else { c })
            .collect();

        normalized.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    fn scan_numbers<'a>(&'a self, text: &'a str) -> impl Iterator<Item = f64> + 'a {
        let patterns = &self.selectors.patterns;
        numeric_tokens(text, patterns.thousands_separator, patterns.decimal_separator)
            .into_iter()
            .filter_map(move |token| self.parse_token(token))
    }

    /// Price in currency units
    ///
    /// Tries the price pattern first, then any number in the text that falls
    /// within `PRICE_SCAN_MIN..=PRICE_SCAN_MAX`.
    pub fn extract_price(&self, text: &str) -> Option<f64> {
        let plausible = |value: &f64| (PRICE_SCAN_MIN..=PRICE_SCAN_MAX).contains(value);

        let primary = self
            .selectors
            .patterns
            .price
            .captures(text)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
            .and_then(|m| self.parse_number(m.as_str()))
            .filter(plausible);

        primary.or_else(|| self.scan_numbers(text).find(plausible))
    }

    /// Odometer reading in kilometres
    pub fn extract_mileage(&self, text: &str) -> Option<u32> {
        let in_range = |value: &f64| *value >= 0.0 && *value <= MAX_MILEAGE as f64;

        self.selectors
            .patterns
            .mileage
            .captures(text)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
            .and_then(|m| self.parse_number(m.as_str()))
            .filter(in_range)
            .or_else(|| self.scan_numbers(text).find(in_range))
            .map(|value| value.round() as u32)
    }

    /// Model year
    ///
    /// In the `manufacture/model` notation (`2022/2023`) the later year wins.
    pub fn extract_year(&self, text: &str) -> Option<u16> {
        let max = max_year();

        self.selectors
            .patterns
            .year
            .captures_iter(text)
            .find_map(|caps| {
                let groups: Vec<u16> = if caps.len() > 1 {
                    caps.iter()
                        .skip(1)
                        .flatten()
                        .filter_map(|m| m.as_str().parse().ok())
                        .collect()
                } else {
                    caps.get(0)
                        .and_then(|m| m.as_str().parse().ok())
                        .into_iter()
                        .collect()
                };

                groups
                    .into_iter()
                    .filter(|year| (MIN_YEAR..=max).contains(year))
                    .max()
            })
    }

    /// Number of doors, falling back to a lone digit in range
    pub fn extract_doors(&self, text: &str) -> Option<u8> {
        let in_range = |doors: &u8| (MIN_DOORS..=MAX_DOORS).contains(doors);

        let primary = self
            .selectors
            .patterns
            .doors
            .captures(text)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
            .and_then(|m| m.as_str().trim().parse::<u8>().ok())
            .filter(in_range);

        primary.or_else(|| {
            text.split(|c: char| !c.is_ascii_digit())
                .filter(|run| run.len() == 1)
                .filter_map(|run| run.parse::<u8>().ok())
                .find(in_range)
        })
    }

    pub fn normalize_transmission(&self, text: &str) -> Option<Transmission> {
        self.selectors.transmission.lookup(text)
    }

    pub fn normalize_fuel(&self, text: &str) -> Option<FuelType> {
        self.selectors.fuel.lookup(text)
    }

    pub fn normalize_category(&self, text: &str) -> Option<Category> {
        self.selectors.category.lookup(text)
    }

    /// Unique, well-formed absolute HTTP(S) URLs, in order
    pub fn validate_images(&self, images: &[String]) -> Vec<String> {
        sanitize_images(images)
    }

    /// Normalizes every raw field; fields that fail normalization are left empty
    ///
    /// Without a name, `brand model` is used when both are present. Image URLs
    /// are kept as found: validation warns about malformed ones and `Vehicle`
    /// construction drops them.
    pub fn extract_and_normalize(&self, raw: &RawVehicle, scraped_at: DateTime<Utc>) -> VehicleDraft {
        let text = |field: &str| raw.get(field).and_then(clean_text);

        let brand = text("brand");
        let model = text("model");
        let name = text("name").or_else(|| match (&brand, &model) {
            (Some(brand), Some(model)) => Some(format!("{} {}", brand, model)),
            _ => None,
        });

        VehicleDraft {
            id: raw.id.clone(),
            name,
            brand,
            model,
            year: raw.get("year").and_then(|t| self.extract_year(t)),
            price: raw.get("price").and_then(|t| self.extract_price(t)),
            mileage: raw.get("mileage").and_then(|t| self.extract_mileage(t)),
            fuel_type: raw.get("fuel_type").and_then(|t| self.normalize_fuel(t)),
            transmission: raw
                .get("transmission")
                .and_then(|t| self.normalize_transmission(t)),
            color: text("color"),
            doors: raw.get("doors").and_then(|t| self.extract_doors(t)),
            category: raw.get("category").and_then(|t| self.normalize_category(t)),
            images: raw.images.clone(),
            description: text("description"),
            url: raw.url.clone(),
            scraped_at,
        }
    }
}

fn clean_text(raw: &str) -> Option<String> {
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Runs of digits and separators that start with a digit
///
/// Trailing separators are dropped, so `R$ 95.990,` yields `95.990`.
fn numeric_tokens(text: &str, thousands: char, decimal: char) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (index, c) in text.char_indices() {
        let part_of_number =
            c.is_ascii_digit() || (start.is_some() && (c == thousands || c == decimal));
        match (start, part_of_number) {
            (None, true) => start = Some(index),
            (Some(from), false) => {
                push_token(&mut tokens, &text[from..index], thousands, decimal);
                start = None;
            }
            _ => {}
        }
    }

    if let Some(from) = start {
        push_token(&mut tokens, &text[from..], thousands, decimal);
    }

    tokens
}

fn push_token<'a>(tokens: &mut Vec<&'a str>, raw: &'a str, thousands: char, decimal: char) {
    let token = raw.trim_end_matches([thousands, decimal]);
    if !token.is_empty() {
        tokens.push(token);
    }
}
