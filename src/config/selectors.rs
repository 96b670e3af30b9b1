//! Selector and mapping document
//!
//! The document tells the parser where each field lives in the page markup and
//! tells the extractor how to turn free text into canonical values. Operators
//! edit it when the source changes its markup; no code change is needed.
//!
//! ```toml
//! images = ["[data-gallery] img@src"]
//!
//! [fields]
//! price = ["span.price-new", "[data-field=price]", "label:Preço"]
//!
//! [listing]
//! links = ["a.vehicle-card@href"]
//! next-page = ["a[rel=next]@href"]
//!
//! [patterns]
//! price = 'R\$\s*([\d.,]+)'
//! thousands-separator = "."
//! decimal-separator = ","
//!
//! [mappings.transmission]
//! "automática" = "automatic"
//! ```
//!
//! Every section is optional. A field or table that the document leaves out
//! keeps its built-in default.

use crate::model::{Category, FuelType, Transmission};
use crate::{ConfigError, ConfigResult};
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Fields the parser extracts with selector chains, in extraction order
pub const FIELD_NAMES: [&str; 12] = [
    "name",
    "brand",
    "model",
    "year",
    "price",
    "mileage",
    "fuel_type",
    "transmission",
    "color",
    "doors",
    "category",
    "description",
];

/// Raw selector document as written by operators
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelectorDocument {
    #[serde(default)]
    pub images: Vec<String>,

    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub listing: ListingDocument,

    #[serde(default)]
    pub patterns: PatternDocument,

    #[serde(default)]
    pub mappings: MappingDocument,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListingDocument {
    #[serde(default)]
    pub links: Vec<String>,

    #[serde(default)]
    pub next_page: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PatternDocument {
    pub price: Option<String>,
    pub mileage: Option<String>,
    pub year: Option<String>,
    pub doors: Option<String>,
    pub thousands_separator: Option<char>,
    pub decimal_separator: Option<char>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingDocument {
    #[serde(default)]
    pub transmission: BTreeMap<String, String>,

    #[serde(default)]
    pub fuel: BTreeMap<String, String>,

    #[serde(default)]
    pub category: BTreeMap<String, String>,
}

/// One way of locating a field value in a page
#[derive(Debug, Clone)]
pub enum SelectorStrategy {
    /// Text content of the first matching element
    Text { raw: String, selector: Selector },
    /// Attribute value of the first matching element
    Attribute {
        raw: String,
        selector: Selector,
        attribute: String,
    },
    /// Text token following a label token in the page body
    Label { raw: String, label: String },
}

impl SelectorStrategy {
    /// Compiles one strategy from its textual form
    ///
    /// * `label:Marca` - value following the "Marca" label
    /// * `img.photo@src` - `src` attribute of the first `img.photo`
    /// * `h1.title` - text of the first `h1.title`
    pub fn parse(field: &str, raw: &str) -> ConfigResult<Self> {
        let raw = raw.trim();
        let invalid = || ConfigError::InvalidSelector {
            field: field.to_string(),
            selector: raw.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid());
        }

        if let Some(label) = raw.strip_prefix("label:") {
            let label = label.trim();
            if label.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Label {
                raw: raw.to_string(),
                label: label.to_string(),
            });
        }

        if let Some((css, attribute)) = raw.rsplit_once('@') {
            if is_attribute_name(attribute) {
                let selector = Selector::parse(css.trim()).map_err(|_| invalid())?;
                return Ok(Self::Attribute {
                    raw: raw.to_string(),
                    selector,
                    attribute: attribute.to_string(),
                });
            }
        }

        let selector = Selector::parse(raw).map_err(|_| invalid())?;
        Ok(Self::Text {
            raw: raw.to_string(),
            selector,
        })
    }

    /// The strategy as written in the document
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text { raw, .. } | Self::Attribute { raw, .. } | Self::Label { raw, .. } => raw,
        }
    }
}

fn is_attribute_name(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

fn compile_chain(field: &str, raw: &[String]) -> ConfigResult<Vec<SelectorStrategy>> {
    raw.iter()
        .map(|strategy| SelectorStrategy::parse(field, strategy))
        .collect()
}

/// Compiled numeric patterns and separators of the source's locale
#[derive(Debug, Clone)]
pub struct Patterns {
    pub price: Regex,
    pub mileage: Regex,
    pub year: Regex,
    pub doors: Regex,
    pub thousands_separator: char,
    pub decimal_separator: char,
}

const DEFAULT_PRICE_PATTERN: &str = r"R\$\s*([\d.,]+)";
const DEFAULT_MILEAGE_PATTERN: &str = r"(?i)([\d.,]+)\s*(?:km|quil[oô]metros)";
const DEFAULT_YEAR_PATTERN: &str = r"\b(\d{4})\s*(?:/\s*(\d{4}))?\b";
const DEFAULT_DOORS_PATTERN: &str = r"(?i)\b([2-5])\s*(?:portas|p\b)";

impl Patterns {
    fn compile(doc: &PatternDocument) -> ConfigResult<Self> {
        let compile = |field: &str, custom: &Option<String>, fallback: &str| {
            let source = custom.as_deref().unwrap_or(fallback);
            Regex::new(source).map_err(|e| ConfigError::InvalidPattern {
                field: field.to_string(),
                message: e.to_string(),
            })
        };

        let thousands_separator = doc.thousands_separator.unwrap_or('.');
        let decimal_separator = doc.decimal_separator.unwrap_or(',');
        if thousands_separator == decimal_separator {
            return Err(ConfigError::InvalidPattern {
                field: "separators".to_string(),
                message: format!(
                    "thousands and decimal separators must differ, both are '{}'",
                    decimal_separator
                ),
            });
        }

        Ok(Self {
            price: compile("price", &doc.price, DEFAULT_PRICE_PATTERN)?,
            mileage: compile("mileage", &doc.mileage, DEFAULT_MILEAGE_PATTERN)?,
            year: compile("year", &doc.year, DEFAULT_YEAR_PATTERN)?,
            doors: compile("doors", &doc.doors, DEFAULT_DOORS_PATTERN)?,
            thousands_separator,
            decimal_separator,
        })
    }
}

/// Alias table mapping free text to a canonical enumerated value
///
/// Lookup folds case and accents, tries an exact alias match first, then the
/// longest alias contained in the text.
#[derive(Debug, Clone)]
pub struct MappingTable<T> {
    exact: BTreeMap<String, T>,
    by_length: Vec<(String, T)>,
}

impl<T: Copy + FromStr> MappingTable<T> {
    fn build(table: &str, builtin: &[(&str, &str)], custom: &BTreeMap<String, String>) -> ConfigResult<Self> {
        let mut exact = BTreeMap::new();

        let entries = builtin
            .iter()
            .map(|(alias, target)| (alias.to_string(), target.to_string()))
            .chain(custom.iter().map(|(alias, target)| (alias.clone(), target.clone())));

        for (alias, target) in entries {
            let value = T::from_str(&target).map_err(|_| ConfigError::InvalidMapping {
                table: table.to_string(),
                alias: alias.clone(),
                target: target.clone(),
            })?;
            let folded = fold_text(&alias);
            if folded.is_empty() {
                return Err(ConfigError::InvalidMapping {
                    table: table.to_string(),
                    alias,
                    target,
                });
            }
            exact.insert(folded, value);
        }

        let mut by_length: Vec<(String, T)> =
            exact.iter().map(|(alias, value)| (alias.clone(), *value)).collect();
        by_length.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Ok(Self { exact, by_length })
    }

    /// Maps free text to a canonical value, if any alias matches
    pub fn lookup(&self, text: &str) -> Option<T> {
        let folded = fold_text(text);
        if folded.is_empty() {
            return None;
        }

        if let Some(value) = self.exact.get(&folded) {
            return Some(*value);
        }

        self.by_length
            .iter()
            .find(|(alias, _)| folded.contains(alias.as_str()))
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// Lowercases, strips common Latin accents and collapses whitespace
pub fn fold_text(text: &str) -> String {
    let stripped: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

const BUILTIN_TRANSMISSION: &[(&str, &str)] = &[
    ("manual", "manual"),
    ("mecanico", "manual"),
    ("mecanica", "manual"),
    ("automatico", "automatic"),
    ("automatica", "automatic"),
    ("automatic", "automatic"),
    ("automatizado", "automated"),
    ("automatizada", "automated"),
    ("automated", "automated"),
    ("semi-automatico", "automated"),
    ("cvt", "cvt"),
    ("automatico cvt", "cvt"),
    ("continuamente variavel", "cvt"),
];

const BUILTIN_FUEL: &[(&str, &str)] = &[
    ("flex", "flex"),
    ("gasolina e alcool", "flex"),
    ("alcool e gasolina", "flex"),
    ("gasolina", "gasoline"),
    ("gasoline", "gasoline"),
    ("alcool", "ethanol"),
    ("etanol", "ethanol"),
    ("ethanol", "ethanol"),
    ("diesel", "diesel"),
    ("eletrico", "electric"),
    ("electric", "electric"),
    ("hibrido", "hybrid"),
    ("hybrid", "hybrid"),
    ("gnv", "cng"),
    ("gas natural", "cng"),
    ("cng", "cng"),
];

const BUILTIN_CATEGORY: &[(&str, &str)] = &[
    ("hatch", "hatch"),
    ("hatchback", "hatch"),
    ("sedan", "sedan"),
    ("seda", "sedan"),
    ("suv", "suv"),
    ("utilitario esportivo", "suv"),
    ("crossover", "suv"),
    ("pickup", "pickup"),
    ("picape", "pickup"),
    ("caminhonete", "pickup"),
    ("van", "van"),
    ("minivan", "van"),
    ("furgao", "van"),
    ("coupe", "coupe"),
    ("cupe", "coupe"),
    ("conversivel", "convertible"),
    ("cabriolet", "convertible"),
    ("convertible", "convertible"),
    ("wagon", "wagon"),
    ("perua", "wagon"),
    ("station wagon", "wagon"),
];

fn builtin_field_chain(field: &str) -> &'static [&'static str] {
    match field {
        "name" => &["h1.vehicle-title", "h1", "meta[property=\"og:title\"]@content"],
        "brand" => &["[data-field=brand]", "label:Marca"],
        "model" => &["[data-field=model]", "label:Modelo"],
        "year" => &["[data-field=year]", "label:Ano"],
        "price" => &["[data-field=price]", ".price", "label:Preço"],
        "mileage" => &["[data-field=mileage]", "label:Quilometragem", "label:KM"],
        "fuel_type" => &["[data-field=fuel]", "label:Combustível"],
        "transmission" => &["[data-field=transmission]", "label:Câmbio"],
        "color" => &["[data-field=color]", "label:Cor"],
        "doors" => &["[data-field=doors]", "label:Portas"],
        "category" => &["[data-field=category]", "label:Carroceria", "label:Categoria"],
        "description" => &[
            "[data-field=description]",
            ".description",
            "meta[name=\"description\"]@content",
        ],
        _ => &[],
    }
}

const BUILTIN_IMAGES: &[&str] = &[
    "[data-gallery] img@src",
    ".gallery img@src",
    "img.vehicle-photo@src",
];

const BUILTIN_LISTING_LINKS: &[&str] = &["a.vehicle-card@href", "[data-vehicle-link]@href"];

const BUILTIN_NEXT_PAGE: &[&str] = &["a[rel=next]@href", ".pagination a.next@href"];

fn owned(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

/// Compiled, immutable selector and mapping configuration
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    fields: Vec<(&'static str, Vec<SelectorStrategy>)>,
    images: Vec<SelectorStrategy>,
    listing_links: Vec<SelectorStrategy>,
    next_page: Vec<SelectorStrategy>,
    pub patterns: Patterns,
    pub transmission: MappingTable<Transmission>,
    pub fuel: MappingTable<FuelType>,
    pub category: MappingTable<Category>,
}

impl SelectorConfig {
    /// Built-in selectors, patterns and mapping tables
    pub fn builtin() -> ConfigResult<Self> {
        Self::from_document(SelectorDocument::default())
    }

    /// Compiles a document, filling every omitted part from the built-in defaults
    pub fn from_document(doc: SelectorDocument) -> ConfigResult<Self> {
        if let Some(unknown) = doc
            .fields
            .keys()
            .find(|name| !FIELD_NAMES.contains(&name.as_str()))
        {
            return Err(ConfigError::Validation(format!(
                "Unknown field '{}' in selector document (known: {})",
                unknown,
                FIELD_NAMES.join(", ")
            )));
        }

        let mut fields = Vec::with_capacity(FIELD_NAMES.len());
        for name in FIELD_NAMES {
            let raw = match doc.fields.get(name) {
                Some(chain) if !chain.is_empty() => chain.clone(),
                _ => owned(builtin_field_chain(name)),
            };
            fields.push((name, compile_chain(name, &raw)?));
        }

        let or_builtin = |raw: &[String], builtin: &[&str]| {
            if raw.is_empty() {
                owned(builtin)
            } else {
                raw.to_vec()
            }
        };

        Ok(Self {
            fields,
            images: compile_chain("images", &or_builtin(&doc.images, BUILTIN_IMAGES))?,
            listing_links: compile_chain(
                "listing.links",
                &or_builtin(&doc.listing.links, BUILTIN_LISTING_LINKS),
            )?,
            next_page: compile_chain(
                "listing.next-page",
                &or_builtin(&doc.listing.next_page, BUILTIN_NEXT_PAGE),
            )?,
            patterns: Patterns::compile(&doc.patterns)?,
            transmission: MappingTable::build(
                "transmission",
                BUILTIN_TRANSMISSION,
                &doc.mappings.transmission,
            )?,
            fuel: MappingTable::build("fuel", BUILTIN_FUEL, &doc.mappings.fuel)?,
            category: MappingTable::build("category", BUILTIN_CATEGORY, &doc.mappings.category)?,
        })
    }

    /// Ordered strategies for one field (empty for unknown fields)
    pub fn field_strategies(&self, field: &str) -> &[SelectorStrategy] {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, chain)| chain.as_slice())
            .unwrap_or(&[])
    }

    /// Every field with its strategy chain, in extraction order
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &[SelectorStrategy])> + '_ {
        self.fields.iter().map(|(name, chain)| (*name, chain.as_slice()))
    }

    pub fn image_strategies(&self) -> &[SelectorStrategy] {
        &self.images
    }

    pub fn listing_link_strategies(&self) -> &[SelectorStrategy] {
        &self.listing_links
    }

    pub fn next_page_strategies(&self) -> &[SelectorStrategy] {
        &self.next_page
    }
}
