//! HTML parser for vehicle detail and listing pages
//!
//! Each field is located by trying its strategies in order until one yields a
//! non-empty value. Which strategy won (or that all of them failed) is counted
//! per field, so a markup change on the source shows up as a shift in the
//! counters long before records start failing validation.

use crate::config::{SelectorConfig, SelectorStrategy};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use url::Url;

/// Raw field text extracted from one detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawVehicle {
    pub id: String,
    pub url: String,
    /// Field name to trimmed text, only for fields some strategy found
    pub fields: BTreeMap<String, String>,
    /// Absolute image URLs in page order, unvalidated
    pub images: Vec<String>,
}

impl RawVehicle {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Extraction counters for one field
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldStats {
    /// `hits[i]` counts pages where strategy `i` produced the value
    pub hits: Vec<u64>,
    /// Pages where no strategy produced a value
    pub misses: u64,
}

impl FieldStats {
    pub fn attempts(&self) -> u64 {
        self.hits.iter().sum::<u64>() + self.misses
    }

    /// Fraction of attempts that produced a value
    pub fn hit_rate(&self) -> f64 {
        match self.attempts() {
            0 => 0.0,
            attempts => (attempts - self.misses) as f64 / attempts as f64,
        }
    }
}

/// Snapshot of extraction health
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionStats {
    pub pages: u64,
    pub fields: BTreeMap<String, FieldStats>,
}

/// Selector-chain driven HTML parser
///
/// Shared between workers; the counters sit behind a mutex and everything
/// else is immutable.
#[derive(Debug)]
pub struct HtmlParser {
    selectors: Arc<SelectorConfig>,
    stats: Mutex<ExtractionStats>,
    debug_dump_dir: Option<PathBuf>,
}

impl HtmlParser {
    pub fn new(selectors: Arc<SelectorConfig>) -> Self {
        Self {
            selectors,
            stats: Mutex::new(ExtractionStats::default()),
            debug_dump_dir: None,
        }
    }

    /// Enables markup dumps for pages that miss required fields
    pub fn with_debug_dump_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dump_dir = dir;
        self
    }

    /// Returns the first non-empty value of `field`'s strategy chain
    ///
    /// The outcome is recorded in the extraction counters.
    pub fn extract_field(&self, document: &Html, field: &str) -> Option<String> {
        let tokens = text_tokens(document);
        self.extract_field_with_tokens(document, &tokens, field)
    }

    fn extract_field_with_tokens(
        &self,
        document: &Html,
        tokens: &[String],
        field: &str,
    ) -> Option<String> {
        let chain = self.selectors.field_strategies(field);
        let found = chain
            .iter()
            .enumerate()
            .find_map(|(index, strategy)| {
                apply_strategy(document, tokens, strategy).map(|value| (index, value))
            });

        self.record_outcome(field, chain.len(), found.as_ref().map(|(index, _)| *index));

        match found {
            Some((index, value)) => {
                if index > 0 {
                    debug!("Field '{}' found by fallback strategy #{}", field, index);
                }
                Some(value)
            }
            None => None,
        }
    }

    /// Runs every field chain and the image chain over a detail page
    pub fn extract_vehicle(&self, html: &str, url: &str) -> RawVehicle {
        let document = Html::parse_document(html);
        let tokens = text_tokens(&document);

        let mut fields = BTreeMap::new();
        for (field, _) in self.selectors.fields() {
            if let Some(value) = self.extract_field_with_tokens(&document, &tokens, field) {
                fields.insert(field.to_string(), value);
            }
        }

        let images = Url::parse(url)
            .map(|base| self.extract_images(&document, &base))
            .unwrap_or_default();

        if let Ok(mut stats) = self.stats.lock() {
            stats.pages += 1;
        }

        RawVehicle {
            id: vehicle_id_from_url(url),
            url: url.to_string(),
            fields,
            images,
        }
    }

    /// Image URLs from the first image strategy that finds any
    fn extract_images(&self, document: &Html, base: &Url) -> Vec<String> {
        self.selectors
            .image_strategies()
            .iter()
            .map(|strategy| collect_urls(document, strategy, base))
            .find(|urls| !urls.is_empty())
            .unwrap_or_default()
    }

    /// Detail page links of a listing page, absolute and de-duplicated
    pub fn extract_vehicle_links(&self, html: &str, page_url: &str) -> Vec<String> {
        let Ok(base) = Url::parse(page_url) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);

        self.selectors
            .listing_link_strategies()
            .iter()
            .map(|strategy| collect_urls(&document, strategy, &base))
            .find(|urls| !urls.is_empty())
            .unwrap_or_default()
    }

    /// Absolute URL of the next listing page, if the page links one
    pub fn extract_next_page_url(&self, html: &str, page_url: &str) -> Option<String> {
        let base = Url::parse(page_url).ok()?;
        let document = Html::parse_document(html);

        self.selectors
            .next_page_strategies()
            .iter()
            .flat_map(|strategy| collect_urls(&document, strategy, &base))
            .find(|next| next != base.as_str())
    }

    /// Copy of the extraction counters
    pub fn extraction_stats(&self) -> ExtractionStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Writes the page markup to the dump directory, if one is configured
    ///
    /// Returns the written path. Failures are logged and otherwise ignored.
    pub fn dump_markup(&self, raw: &RawVehicle, html: &str, missing: &[String]) -> Option<PathBuf> {
        let dir = self.debug_dump_dir.as_ref()?;
        let path = dir.join(format!("{}.html", sanitize_file_stem(&raw.id)));

        match write_dump(dir, &path, &raw.url, html, missing) {
            Ok(()) => {
                debug!("Dumped markup of {} to {}", raw.url, path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to dump markup of {}: {}", raw.url, e);
                None
            }
        }
    }

    fn record_outcome(&self, field: &str, chain_len: usize, winner: Option<usize>) {
        if let Ok(mut stats) = self.stats.lock() {
            let entry = stats.fields.entry(field.to_string()).or_default();
            if entry.hits.len() < chain_len {
                entry.hits.resize(chain_len, 0);
            }
            match winner {
                Some(index) => entry.hits[index] += 1,
                None => entry.misses += 1,
            }
        }
    }
}

fn write_dump(
    dir: &Path,
    path: &Path,
    url: &str,
    html: &str,
    missing: &[String],
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let header = format!(
        "<!-- url: {} -->\n<!-- missing: {} -->\n",
        url,
        missing.join(", ")
    );
    std::fs::write(path, header + html)
}

fn sanitize_file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Stable identifier for a detail page
///
/// The last digit run of the last path segment (`/carros/honda-civic-12345`
/// gives `12345`), else the segment itself, else a short digest of the URL.
pub fn vehicle_id_from_url(url: &str) -> String {
    let segment = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|segments| segments.rev().find(|s| !s.is_empty()).map(str::to_string))
    });

    if let Some(segment) = segment {
        let stem = match segment.rsplit_once('.') {
            Some((stem, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphabetic()) => {
                stem.to_string()
            }
            _ => segment.clone(),
        };

        if let Some(digits) = last_digit_run(&stem) {
            return digits;
        }
        if !stem.is_empty() {
            return stem;
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

fn last_digit_run(text: &str) -> Option<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs.pop()
}

/// Non-empty visible text nodes of the body, whitespace-collapsed
fn text_tokens(document: &Html) -> Vec<String> {
    let Ok(body) = Selector::parse("body") else {
        return Vec::new();
    };

    document
        .select(&body)
        .next()
        .map(|element| {
            element
                .text()
                .map(collapse_whitespace)
                .filter(|token| !token.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn apply_strategy(document: &Html, tokens: &[String], strategy: &SelectorStrategy) -> Option<String> {
    let value = match strategy {
        SelectorStrategy::Text { selector, .. } => document
            .select(selector)
            .map(element_text)
            .find(|text| !text.is_empty()),
        SelectorStrategy::Attribute {
            selector,
            attribute,
            ..
        } => document
            .select(selector)
            .filter_map(|element| element.value().attr(attribute))
            .map(collapse_whitespace)
            .find(|value| !value.is_empty()),
        SelectorStrategy::Label { label, .. } => value_after_label(tokens, label),
    };

    value.filter(|v| !v.is_empty())
}

/// Value following a label token, e.g. `Câmbio` then `Automático`
///
/// Matches `Label`, `Label:` and the inline form `Label: value`.
fn value_after_label(tokens: &[String], label: &str) -> Option<String> {
    let wanted = label.trim().trim_end_matches(':').to_lowercase();

    for (index, token) in tokens.iter().enumerate() {
        let lowered = token.to_lowercase();
        if lowered.trim_end_matches(':').trim() == wanted {
            return tokens.get(index + 1).cloned();
        }

        if let Some(rest) = lowered.strip_prefix(&wanted) {
            if let Some(value) = rest.trim_start().strip_prefix(':') {
                let value = value.trim();
                if !value.is_empty() {
                    // slice the original token to keep its casing
                    let offset = token.len().saturating_sub(value.len());
                    return match token.get(offset..) {
                        Some(original) => Some(original.to_string()),
                        None => Some(value.to_string()),
                    };
                }
            }
        }
    }

    None
}

/// Every URL a strategy yields, resolved against `base`, de-duplicated
fn collect_urls(document: &Html, strategy: &SelectorStrategy, base: &Url) -> Vec<String> {
    let raw: Vec<String> = match strategy {
        SelectorStrategy::Attribute {
            selector,
            attribute,
            ..
        } => document
            .select(selector)
            .filter_map(|element| element.value().attr(attribute))
            .map(str::to_string)
            .collect(),
        SelectorStrategy::Text { selector, .. } => {
            document.select(selector).map(element_text).collect()
        }
        SelectorStrategy::Label { .. } => Vec::new(),
    };

    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|href| resolve_link(href, base))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Resolves an href to an absolute HTTP(S) URL
///
/// Returns None for javascript:, mailto:, tel: and data: links, fragment-only
/// links and anything that does not resolve to HTTP(S).
fn resolve_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base.join(href) {
        Ok(absolute) if matches!(absolute.scheme(), "http" | "https") => {
            Some(absolute.to_string())
        }
        _ => None,
    }
}
