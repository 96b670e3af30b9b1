//! Per-item pipeline run by each worker
//!
//! fetch -> extract -> normalize -> validate -> construct. Workers never touch
//! the ledgers; they hand an `ItemOutcome` to the coordinator, which is the
//! only writer.

use crate::http::{Clock, HttpClient};
use crate::model::{RejectedRecord, ValidationResult, Vehicle};
use crate::parser::{FieldExtractor, HtmlParser};
use std::sync::Arc;
use tracing::{debug, warn};

/// One detail page to process
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkItem {
    pub id: String,
    pub url: String,
}

/// What a worker made of one detail page
#[derive(Debug)]
pub(crate) enum ItemOutcome {
    Valid {
        vehicle: Vehicle,
        completeness: f64,
    },
    Invalid {
        rejected: RejectedRecord,
        completeness: Option<f64>,
    },
}

#[derive(Debug)]
pub(crate) struct Processed {
    pub id: String,
    pub outcome: ItemOutcome,
}

/// Shared, immutable collaborators of the workers
#[derive(Debug, Clone)]
pub(crate) struct ItemPipeline {
    pub client: Arc<HttpClient>,
    pub parser: Arc<HtmlParser>,
    pub extractor: Arc<FieldExtractor>,
    pub clock: Arc<dyn Clock>,
    pub min_completeness: f64,
}

impl ItemPipeline {
    pub async fn process(&self, item: WorkItem) -> Processed {
        let outcome = self.process_inner(&item).await;
        Processed {
            id: item.id,
            outcome,
        }
    }

    async fn process_inner(&self, item: &WorkItem) -> ItemOutcome {
        let response = match self.client.get(&item.url).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch {}: {}", item.url, e);
                return ItemOutcome::Invalid {
                    rejected: RejectedRecord::new(
                        item.url.clone(),
                        Some(item.id.clone()),
                        vec![format!("fetch failed: {}", e)],
                    ),
                    completeness: None,
                };
            }
        };

        // relative image URLs resolve against where the page actually lives
        let mut raw = self
            .parser
            .extract_vehicle(&response.body, &response.final_url);
        raw.id = item.id.clone();
        raw.url = item.url.clone();

        let draft = self.extractor.extract_and_normalize(&raw, self.clock.utc_now());
        let validation = ValidationResult::validate(&draft, self.min_completeness);

        for warning in &validation.warnings {
            debug!("{}: {}", item.url, warning);
        }

        if !validation.is_valid {
            debug!(
                "Rejected {}: {}",
                item.url,
                validation.errors.join("; ")
            );
            if !validation.missing_fields.is_empty() {
                self.parser
                    .dump_markup(&raw, &response.body, &validation.missing_fields);
            }
            return ItemOutcome::Invalid {
                rejected: RejectedRecord::new(
                    item.url.clone(),
                    Some(item.id.clone()),
                    validation.errors,
                ),
                completeness: Some(validation.completeness),
            };
        }

        match Vehicle::try_from(draft) {
            Ok(vehicle) => ItemOutcome::Valid {
                vehicle,
                completeness: validation.completeness,
            },
            Err(e) => ItemOutcome::Invalid {
                rejected: RejectedRecord::new(
                    item.url.clone(),
                    Some(item.id.clone()),
                    vec![e.to_string()],
                ),
                completeness: Some(validation.completeness),
            },
        }
    }
}
