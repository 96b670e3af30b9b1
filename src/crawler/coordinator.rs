//! Crawler coordinator - main ingestion loop
//!
//! A run goes through these phases:
//! 1. Resume: skip ids handled by an interrupted previous run
//! 2. Discovery: walk every start URL's listing pages, collecting detail links
//! 3. Processing: a bounded queue feeds N workers; outcomes flow back to this
//!    task, the single writer of the vehicle and checkpoint ledgers
//! 4. Reconciliation (full mode, uncancelled, complete discovery only)
//! 5. Bookkeeping: final checkpoint, checkpoint pruning, metrics, run history

use crate::config::{Config, SelectorConfig};
use crate::crawler::worker::{ItemOutcome, ItemPipeline, Processed, WorkItem};
use crate::http::{Clock, HttpClient};
use crate::model::{Checkpoint, RunMode, ScrapingResult, META_COMPLETED, META_PROCESSED_IDS};
use crate::parser::{vehicle_id_from_url, FieldExtractor, HtmlParser};
use crate::state::StateManager;
use crate::IngestError;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

/// Cooperative cancellation flag shared with the CLI's Ctrl-C handler
///
/// Stopping lets in-flight fetches finish; no new item is started. Tasks
/// blocked on the work queue wake up through `stopped()`.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn request_stop(&self) {
        self.0.send_replace(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.0.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Detail links found while walking the listing pages
#[derive(Debug, Default)]
struct Discovery {
    items: Vec<WorkItem>,
    listing_pages: u64,
    /// False when a listing page failed or the walk was cancelled
    complete: bool,
}

/// Run-scoped aggregation state, owned by the coordinator task
struct RunProgress {
    result: ScrapingResult,
    handled: BTreeSet<String>,
    last_id: Option<String>,
    completeness_sum: f64,
    completeness_count: u64,
}

impl RunProgress {
    fn checkpoint(&self, timestamp: chrono::DateTime<chrono::Utc>, completed: bool) -> Checkpoint {
        let mut checkpoint = Checkpoint::from_result(&self.result, self.last_id.clone(), timestamp);
        if completed {
            checkpoint
                .metadata
                .insert(META_COMPLETED.to_string(), serde_json::json!(true));
        } else {
            checkpoint.metadata.insert(
                META_PROCESSED_IDS.to_string(),
                serde_json::json!(self.handled.iter().collect::<Vec<_>>()),
            );
        }
        checkpoint
    }
}

/// Main ingestion coordinator
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: Option<String>,
    client: Arc<HttpClient>,
    parser: Arc<HtmlParser>,
    extractor: Arc<FieldExtractor>,
    state: StateManager,
    clock: Arc<dyn Clock>,
    stop: StopHandle,
}

impl Coordinator {
    /// Creates a coordinator for one source
    ///
    /// # Arguments
    ///
    /// * `config` - Validated settings document
    /// * `selectors` - Compiled selector document
    /// * `state` - Ledger handle (SQLite for real runs, memory for dry runs)
    /// * `clock` - Time source for rate limiting, backoff and timestamps
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run
    /// * `Err(IngestError)` - The HTTP client could not be built
    pub fn new(
        config: Config,
        selectors: SelectorConfig,
        state: StateManager,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IngestError> {
        let client = HttpClient::new(&config, clock.clone())?;
        let selectors = Arc::new(selectors);
        let parser = HtmlParser::new(selectors.clone())
            .with_debug_dump_dir(config.output.debug_dump_dir.clone());

        Ok(Self {
            config: Arc::new(config),
            config_hash: None,
            client: Arc::new(client),
            parser: Arc::new(parser),
            extractor: Arc::new(FieldExtractor::new(selectors)),
            state,
            clock,
            stop: StopHandle::new(),
        })
    }

    /// Records the settings file hash in every run's metrics
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn parser(&self) -> &HtmlParser {
        &self.parser
    }

    /// Runs one ingestion pass and returns its result
    ///
    /// Fetch, extraction and validation failures become rejected records.
    /// Ledger failures abort the run with an error.
    pub async fn run(&self, mode: RunMode) -> Result<ScrapingResult, IngestError> {
        let mut progress = RunProgress {
            result: ScrapingResult::new(mode, self.clock.utc_now()),
            handled: BTreeSet::new(),
            last_id: None,
            completeness_sum: 0.0,
            completeness_count: 0,
        };
        info!("Starting {} run {}", mode, progress.result.id);

        let resumed = self.resume_point()?;
        progress.handled.extend(resumed.iter().cloned());

        let discovery = self.discover().await;
        let seen_ids: HashSet<String> = discovery.items.iter().map(|item| item.id.clone()).collect();

        let pending: Vec<WorkItem> = discovery
            .items
            .iter()
            .filter(|item| !resumed.contains(&item.id))
            .cloned()
            .collect();
        let resumed_skipped = discovery.items.len() - pending.len();
        if resumed_skipped > 0 {
            info!("Skipping {} items handled before the interruption", resumed_skipped);
        }

        info!(
            "Discovered {} vehicles on {} listing pages, {} to process",
            discovery.items.len(),
            discovery.listing_pages,
            pending.len()
        );

        self.process_all(pending, &mut progress).await?;

        let cancelled = self.stop.is_stop_requested();
        let mut marked_unavailable = 0usize;

        if mode == RunMode::Full {
            if cancelled {
                info!("Run cancelled, skipping availability reconciliation");
            } else if !discovery.complete {
                warn!("Listing discovery incomplete, skipping availability reconciliation");
            } else {
                marked_unavailable = self.state.reconcile_unavailable(&seen_ids)?.len();
            }
        }

        let final_checkpoint = progress.checkpoint(self.clock.utc_now(), !cancelled);
        self.state.save_checkpoint(&final_checkpoint)?;
        self.state
            .delete_old_checkpoints(self.config.workers.checkpoints_to_keep)?;

        let error_rate = progress.result.error_rate();
        if error_rate > self.config.quality.max_failure_rate {
            warn!(
                "Error rate {:.1}% exceeds the configured maximum of {:.1}%",
                error_rate * 100.0,
                self.config.quality.max_failure_rate * 100.0
            );
        }

        if self.config.logging.metrics {
            self.record_metrics(
                &mut progress,
                &discovery,
                resumed_skipped,
                marked_unavailable,
                cancelled,
            );
        }

        let mut result = progress.result;
        result.finish(self.clock.utc_now());
        self.state.save_scraping_run(&result)?;

        info!(
            "Run {} finished: {} processed, {} new or changed, {} unchanged, {} rejected",
            result.id, result.processed, result.success, result.skipped, result.errors
        );

        Ok(result)
    }

    /// Ids already handled by an interrupted previous run
    fn resume_point(&self) -> Result<HashSet<String>, IngestError> {
        match self.state.get_latest_checkpoint()? {
            Some(checkpoint) if !checkpoint.is_completed() => {
                let ids: HashSet<String> = checkpoint.processed_ids().into_iter().collect();
                info!(
                    "Resuming after interrupted run {} ({} items already handled)",
                    checkpoint.run_id().unwrap_or("unknown"),
                    ids.len()
                );
                Ok(ids)
            }
            _ => Ok(HashSet::new()),
        }
    }

    /// Walks the listing pages of every start URL
    async fn discover(&self) -> Discovery {
        let mut discovery = Discovery {
            complete: true,
            ..Default::default()
        };
        let mut seen_urls = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut visited_pages = HashSet::new();

        for start in &self.config.source.start_urls {
            let mut next = Some(start.clone());
            let mut pages = 0u32;

            while let Some(page_url) = next.take() {
                if self.stop.is_stop_requested() {
                    discovery.complete = false;
                    return discovery;
                }
                if pages >= self.config.source.max_listing_pages {
                    debug!("Reached max listing pages for {}", start);
                    break;
                }
                if !visited_pages.insert(page_url.clone()) {
                    break;
                }

                let response = match self.client.get(&page_url).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Failed to fetch listing page {}: {}", page_url, e);
                        discovery.complete = false;
                        break;
                    }
                };
                pages += 1;
                discovery.listing_pages += 1;

                let links = self
                    .parser
                    .extract_vehicle_links(&response.body, &response.final_url);
                debug!("{} vehicle links on {}", links.len(), page_url);

                for link in links {
                    if !seen_urls.insert(link.clone()) {
                        continue;
                    }
                    // query-string variants of one detail page share an id
                    let id = vehicle_id_from_url(&link);
                    if seen_ids.insert(id.clone()) {
                        discovery.items.push(WorkItem { id, url: link });
                    } else {
                        debug!("Skipping {}: vehicle {} already listed", link, id);
                    }
                }

                next = self
                    .parser
                    .extract_next_page_url(&response.body, &response.final_url);
            }
        }

        discovery
    }

    /// Feeds `pending` through the worker pool and aggregates the outcomes
    async fn process_all(
        &self,
        pending: Vec<WorkItem>,
        progress: &mut RunProgress,
    ) -> Result<(), IngestError> {
        if pending.is_empty() {
            return Ok(());
        }

        let worker_count = self.config.workers.count.min(pending.len()).max(1);
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(self.config.workers.queue_size);
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<Processed>(self.config.workers.queue_size);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let producer = {
            let stop = self.stop.clone();
            tokio::spawn(async move {
                for item in pending {
                    if stop.is_stop_requested() {
                        break;
                    }
                    // a full queue must not outlive a stop or the workers
                    tokio::select! {
                        sent = work_tx.send(item) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                        _ = stop.stopped() => break,
                    }
                }
            })
        };

        let pipeline = ItemPipeline {
            client: self.client.clone(),
            parser: self.parser.clone(),
            extractor: self.extractor.clone(),
            clock: self.clock.clone(),
            min_completeness: self.config.quality.min_completeness,
        };

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let pipeline = pipeline.clone();
            let work_rx = work_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let stop = self.stop.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    if stop.is_stop_requested() || outcome_tx.is_closed() {
                        break;
                    }
                    let next = tokio::select! {
                        next = async { work_rx.lock().await.recv().await } => next,
                        _ = stop.stopped() => None,
                    };
                    let Some(item) = next else {
                        break;
                    };
                    let processed = pipeline.process(item).await;
                    if outcome_tx.send(processed).await.is_err() {
                        break;
                    }
                }
                debug!("Worker {} finished", worker_id);
            }));
        }
        drop(outcome_tx);
        // the workers hold the only receivers now, so the queue closes with them
        drop(work_rx);

        let interval = self.config.workers.checkpoint_interval;
        let mut failure = None;

        while let Some(processed) = outcome_rx.recv().await {
            if let Err(e) = self.aggregate(processed, progress) {
                error!("State update failed, aborting run: {}", e);
                failure = Some(e);
                break;
            }

            if progress.result.processed % interval == 0 {
                let checkpoint = progress.checkpoint(self.clock.utc_now(), false);
                if let Err(e) = self.state.save_checkpoint(&checkpoint) {
                    error!("Checkpoint failed, aborting run: {}", e);
                    failure = Some(e.into());
                    break;
                }
                info!(
                    "Progress: {} processed ({} new or changed, {} unchanged, {} rejected)",
                    progress.result.processed,
                    progress.result.success,
                    progress.result.skipped,
                    progress.result.errors
                );
            }
        }
        // closing the outcome channel tells the workers to wind down
        drop(outcome_rx);
        if failure.is_some() {
            producer.abort();
        }

        let mut handles = vec![producer];
        handles.extend(workers);
        for handle in handles {
            if let Err(e) = handle.await {
                if failure.is_none() {
                    failure = Some(IngestError::Worker(e.to_string()));
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Applies one outcome to the ledgers and the run result
    fn aggregate(&self, processed: Processed, progress: &mut RunProgress) -> Result<(), IngestError> {
        let Processed { id, outcome } = processed;

        match outcome {
            ItemOutcome::Valid {
                vehicle,
                completeness,
            } => {
                progress.completeness_sum += completeness;
                progress.completeness_count += 1;

                if self.state.has_changed(vehicle.id(), vehicle.content_hash())? {
                    self.state.save_vehicle_hash(
                        vehicle.id(),
                        vehicle.content_hash(),
                        &vehicle.ledger_metadata(),
                    )?;
                    debug!("Vehicle {} is new or changed", vehicle.id());
                    progress.result.record_accepted(vehicle);
                } else {
                    self.state.mark_vehicle_seen(vehicle.id())?;
                    debug!("Vehicle {} unchanged", vehicle.id());
                    progress.result.record_skipped();
                }
            }
            ItemOutcome::Invalid {
                rejected,
                completeness,
            } => {
                if let Some(completeness) = completeness {
                    progress.completeness_sum += completeness;
                    progress.completeness_count += 1;
                }
                progress.result.record_rejected(rejected);
            }
        }

        progress.handled.insert(id.clone());
        progress.last_id = Some(id);
        Ok(())
    }

    fn record_metrics(
        &self,
        progress: &mut RunProgress,
        discovery: &Discovery,
        resumed_skipped: usize,
        marked_unavailable: usize,
        cancelled: bool,
    ) {
        let result = &mut progress.result;

        if let Some(hash) = &self.config_hash {
            result.set_metric("config_hash", hash.clone());
        }
        result.set_metric("listing_pages", discovery.listing_pages);
        result.set_metric("discovered", discovery.items.len() as u64);
        result.set_metric("discovery_complete", discovery.complete);
        result.set_metric("resumed_skipped", resumed_skipped as u64);
        result.set_metric("marked_unavailable", marked_unavailable as u64);
        result.set_metric("cancelled", cancelled);
        result.set_metric("success_rate", result.success_rate());
        result.set_metric("error_rate", result.error_rate());

        if progress.completeness_count > 0 {
            result.set_metric(
                "avg_completeness",
                progress.completeness_sum / progress.completeness_count as f64,
            );
        }

        if let Ok(http) = serde_json::to_value(self.client.metrics()) {
            result.set_metric("http", http);
        }
        if let Ok(extraction) = serde_json::to_value(self.parser.extraction_stats()) {
            result.set_metric("extraction", extraction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_handle_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_stop_requested());
        handle.request_stop();
        assert!(clone.is_stop_requested());
    }

    #[tokio::test]
    async fn test_stopped_wakes_waiters() {
        let handle = StopHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.stopped().await })
        };
        tokio::task::yield_now().await;
        handle.request_stop();

        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        // already stopped: resolves immediately
        handle.stopped().await;
    }

    #[test]
    fn test_progress_checkpoint_metadata() {
        let mut progress = RunProgress {
            result: ScrapingResult::new(RunMode::Full, chrono::Utc::now()),
            handled: ["b", "a"].iter().map(|s| s.to_string()).collect(),
            last_id: Some("b".to_string()),
            completeness_sum: 0.0,
            completeness_count: 0,
        };
        progress.result.record_skipped();
        progress.result.record_skipped();

        let interim = progress.checkpoint(chrono::Utc::now(), false);
        assert!(!interim.is_completed());
        assert_eq!(interim.processed_ids(), vec!["a", "b"]);
        assert_eq!(interim.last_processed_id.as_deref(), Some("b"));

        let last = progress.checkpoint(chrono::Utc::now(), true);
        assert!(last.is_completed());
        assert!(last.processed_ids().is_empty());
    }
}
