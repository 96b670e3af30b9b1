//! Page parsing and field normalization
//!
//! - `HtmlParser` turns markup into raw field text through the selector
//!   fallback chains of the selector document and discovers pagination links
//! - `FieldExtractor` turns raw field text into typed, range-checked values

mod extractor;
mod html;

pub use extractor::{FieldExtractor, PRICE_SCAN_MAX, PRICE_SCAN_MIN};
pub use html::{vehicle_id_from_url, ExtractionStats, FieldStats, HtmlParser, RawVehicle};
