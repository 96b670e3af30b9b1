//! Integration tests for the ingestion run
//!
//! A wiremock server plays the listing source; a `ManualClock` keeps rate
//! limiting and backoff instant.

use listing_ingest::config::{load_selectors, Config, OutputFormat};
use listing_ingest::http::{Clock, ManualClock};
use listing_ingest::model::{Checkpoint, META_PROCESSED_IDS};
use listing_ingest::output::write_result;
use listing_ingest::{Coordinator, RunMode, StateManager, StopHandle, VehicleStatus};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn detail_page(title: &str, price: &str) -> String {
    format!(
        r#"<html>
        <head><meta name="description" content="Carro revisado, único dono."></head>
        <body>
            <h1 class="vehicle-title">{title}</h1>
            <span class="price">{price}</span>
            <ul class="specs">
                <li><span>Marca</span><span>Honda</span></li>
                <li><span>Modelo</span><span>Civic</span></li>
                <li><span>Ano</span><span>2019/2020</span></li>
                <li><span>Quilometragem</span><span>50.000 km</span></li>
                <li><span>Câmbio</span><span>Automático</span></li>
                <li>Combustível: Flex</li>
                <li><span>Cor</span><span>Prata</span></li>
                <li><span>Portas</span><span>4</span></li>
                <li><span>Carroceria</span><span>Sedã</span></li>
            </ul>
            <div data-gallery><img src="/fotos/{title}.jpg"></div>
        </body>
        </html>"#
    )
}

fn listing_page(paths: &[&str], next: Option<&str>) -> String {
    let mut html = String::from("<html><body>");
    for path in paths {
        html.push_str(&format!(r#"<a class="vehicle-card" href="{}">Ver</a>"#, path));
    }
    if let Some(next) = next {
        html.push_str(&format!(
            r#"<nav class="pagination"><a rel="next" href="{}">Próxima</a></nav>"#,
            next
        ));
    }
    html.push_str("</body></html>");
    html
}

async fn mount_listing(server: &MockServer, paths: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/carros"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(paths, None)))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, detail_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(detail_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.source.start_urls = vec![format!("{}/carros", server.uri())];
    config.cache.enabled = false;
    config.http.max_retries = 1;
    config.workers.count = 2;
    config.workers.queue_size = 4;
    config.workers.checkpoint_interval = 1;
    config
}

fn coordinator(config: Config, state: &StateManager, clock: &Arc<ManualClock>) -> Coordinator {
    let clock: Arc<dyn Clock> = clock.clone();
    Coordinator::new(config, load_selectors(None).unwrap(), state.clone(), clock).unwrap()
}

async fn two_vehicle_source() -> MockServer {
    let server = MockServer::start().await;
    mount_listing(&server, &["/carros/honda-civic-101", "/carros/honda-civic-202"]).await;
    mount_detail(
        &server,
        "/carros/honda-civic-101",
        detail_page("Civic EXL", "R$ 95.990,00"),
    )
    .await;
    mount_detail(
        &server,
        "/carros/honda-civic-202",
        detail_page("Civic Touring", "R$ 129.900,00"),
    )
    .await;
    server
}

#[tokio::test]
async fn test_first_run_accepts_every_vehicle() {
    let server = two_vehicle_source().await;
    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());

    let result = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();

    assert_eq!(result.processed, 2);
    assert_eq!(result.success, 2);
    assert_eq!(result.errors, 0);
    assert_eq!(result.skipped, 0);
    assert!(result.is_finished());

    let mut ids: Vec<&str> = result.vehicles.iter().map(|v| v.id()).collect();
    ids.sort();
    assert_eq!(ids, vec!["101", "202"]);

    let civic = result.vehicles.iter().find(|v| v.id() == "101").unwrap();
    assert_eq!(civic.price(), 95990.0);
    assert_eq!(civic.year(), 2020);
    assert_eq!(civic.mileage(), 50_000);

    assert_eq!(state.get_vehicle_status("101").unwrap(), Some(VehicleStatus::Active));
    assert!(state.get_latest_checkpoint().unwrap().unwrap().is_completed());
    assert_eq!(result.metrics["discovered"], 2);
    assert_eq!(result.metrics["discovery_complete"], true);
}

#[tokio::test]
async fn test_second_run_skips_unchanged_vehicles() {
    let server = two_vehicle_source().await;
    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());

    coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(3600));

    let second = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();

    assert_eq!(second.processed, 2);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.success, 0);
    assert!(second.vehicles.is_empty());

    let runs = state.get_recent_runs(10).unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, second.id);
}

#[tokio::test]
async fn test_changed_price_is_reported_again() {
    let server = two_vehicle_source().await;
    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());

    coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(3600));

    server.reset().await;
    mount_listing(&server, &["/carros/honda-civic-101", "/carros/honda-civic-202"]).await;
    mount_detail(
        &server,
        "/carros/honda-civic-101",
        detail_page("Civic EXL", "R$ 89.990,00"),
    )
    .await;
    mount_detail(
        &server,
        "/carros/honda-civic-202",
        detail_page("Civic Touring", "R$ 129.900,00"),
    )
    .await;

    let second = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();

    assert_eq!(second.success, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.vehicles[0].id(), "101");
    assert_eq!(second.vehicles[0].price(), 89990.0);
}

#[tokio::test]
async fn test_full_run_marks_missing_vehicles_unavailable() {
    let server = two_vehicle_source().await;
    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());

    coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Full)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(3600));

    server.reset().await;
    mount_listing(&server, &["/carros/honda-civic-101"]).await;
    mount_detail(
        &server,
        "/carros/honda-civic-101",
        detail_page("Civic EXL", "R$ 95.990,00"),
    )
    .await;

    let second = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Full)
        .await
        .unwrap();

    assert_eq!(second.processed, 1);
    assert_eq!(second.metrics["marked_unavailable"], 1);
    assert_eq!(
        state.get_vehicle_status("202").unwrap(),
        Some(VehicleStatus::Unavailable)
    );
    assert_eq!(state.get_active_vehicle_ids().unwrap(), vec!["101"]);

    let stats = state.get_statistics().unwrap();
    assert_eq!(stats.active_vehicles, 1);
    assert_eq!(stats.unavailable_vehicles, 1);
}

#[tokio::test]
async fn test_incremental_run_never_marks_unavailable() {
    let server = two_vehicle_source().await;
    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());

    coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(3600));

    server.reset().await;
    mount_listing(&server, &[]).await;

    let second = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();

    assert_eq!(second.processed, 0);
    assert_eq!(state.get_active_vehicle_ids().unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_listing_page_skips_reconciliation() {
    let server = two_vehicle_source().await;
    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());

    coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Full)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(3600));

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/carros"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let second = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Full)
        .await
        .unwrap();

    assert_eq!(second.metrics["discovery_complete"], false);
    assert_eq!(second.metrics["marked_unavailable"], 0);
    assert_eq!(state.get_active_vehicle_ids().unwrap().len(), 2);
}

#[tokio::test]
async fn test_out_of_range_price_is_rejected_with_reason() {
    let server = MockServer::start().await;
    mount_listing(&server, &["/carros/fusca-303"]).await;
    mount_detail(&server, "/carros/fusca-303", detail_page("Fusca", "R$ 5.000")).await;

    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());
    let result = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();

    assert_eq!(result.processed, 1);
    assert_eq!(result.errors, 1);
    assert_eq!(result.rejected[0].id.as_deref(), Some("303"));
    assert!(result.rejected[0]
        .reasons
        .iter()
        .any(|reason| reason.contains("price") && reason.contains("out of range")));
    assert_eq!(state.get_vehicle_hash("303").unwrap(), None);
}

#[tokio::test]
async fn test_missing_detail_page_becomes_rejection() {
    let server = MockServer::start().await;
    mount_listing(&server, &["/carros/honda-civic-101", "/carros/gone-404"]).await;
    mount_detail(
        &server,
        "/carros/honda-civic-101",
        detail_page("Civic EXL", "R$ 95.990,00"),
    )
    .await;

    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());
    let result = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();

    assert_eq!(result.processed, 2);
    assert_eq!(result.success, 1);
    assert_eq!(result.errors, 1);
    assert!(result.rejected[0].reasons[0].starts_with("fetch failed"));
}

#[tokio::test]
async fn test_listing_pagination_is_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/carros"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_page(&["/carros/honda-civic-202"], None)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/carros"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(
            &["/carros/honda-civic-101"],
            Some("?page=2"),
        )))
        .mount(&server)
        .await;
    mount_detail(
        &server,
        "/carros/honda-civic-101",
        detail_page("Civic EXL", "R$ 95.990,00"),
    )
    .await;
    mount_detail(
        &server,
        "/carros/honda-civic-202",
        detail_page("Civic Touring", "R$ 129.900,00"),
    )
    .await;

    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());
    let result = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();

    assert_eq!(result.metrics["listing_pages"], 2);
    assert_eq!(result.success, 2);
}

#[tokio::test]
async fn test_resume_skips_items_of_interrupted_run() {
    let server = two_vehicle_source().await;
    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());

    let mut interrupted = Checkpoint {
        id: "run-interrupted-00000001".to_string(),
        timestamp: clock.utc_now(),
        processed: 1,
        success: 1,
        errors: 0,
        last_processed_id: Some("101".to_string()),
        metadata: Default::default(),
    };
    interrupted
        .metadata
        .insert(META_PROCESSED_IDS.to_string(), serde_json::json!(["101"]));
    state.save_checkpoint(&interrupted).unwrap();

    let result = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Full)
        .await
        .unwrap();

    assert_eq!(result.processed, 1);
    assert_eq!(result.vehicles[0].id(), "202");
    assert_eq!(result.metrics["resumed_skipped"], 1);
    assert!(state.get_latest_checkpoint().unwrap().unwrap().is_completed());
}

#[tokio::test]
async fn test_stopped_run_processes_nothing_and_keeps_ledger() {
    let server = two_vehicle_source().await;
    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());

    coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Full)
        .await
        .unwrap();
    clock.advance(Duration::from_secs(3600));

    let stopped = coordinator(test_config(&server), &state, &clock);
    stopped.stop_handle().request_stop();
    let result = stopped.run(RunMode::Full).await.unwrap();

    assert_eq!(result.processed, 0);
    assert_eq!(result.metrics["cancelled"], true);
    assert_eq!(state.get_active_vehicle_ids().unwrap().len(), 2);
    assert!(!state.get_latest_checkpoint().unwrap().unwrap().is_completed());
}

#[tokio::test]
async fn test_sqlite_ledger_and_jsonl_artifact() {
    let server = two_vehicle_source().await;
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new());

    let mut config = test_config(&server);
    config.output.path = dir.path().join("out/vehicles.jsonl");
    config.output.format = OutputFormat::Jsonl;
    config.output.database_path = dir.path().join("state.db");
    let output = config.output.clone();

    let state = StateManager::open(&output.database_path, clock.clone()).unwrap();
    let result = coordinator(config, &state, &clock)
        .run(RunMode::Full)
        .await
        .unwrap();
    drop(state);

    let artifact = write_result(&result, &output).unwrap();
    let content = std::fs::read_to_string(artifact).unwrap();
    assert_eq!(content.lines().count(), 3);

    let reopened = StateManager::open(&output.database_path, clock.clone()).unwrap();
    assert_eq!(reopened.get_active_vehicle_ids().unwrap().len(), 2);
    let stored = reopened.get_scraping_run(&result.id).unwrap().unwrap();
    assert_eq!(stored.success, 2);
}

/// Serves a valid detail page and asks the run to stop, like a Ctrl-C mid-run
struct StopWhileServing(StopHandle);

impl Respond for StopWhileServing {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.0.request_stop();
        let title = request.url.path().trim_start_matches("/carros/").to_string();
        ResponseTemplate::new(200).set_body_string(detail_page(&title, "R$ 95.990,00"))
    }
}

#[tokio::test]
async fn test_stop_mid_run_with_full_queue_returns() {
    let server = MockServer::start().await;
    let paths: Vec<String> = (1..=20).map(|i| format!("/carros/car-{}", i)).collect();
    let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
    mount_listing(&server, &paths).await;

    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());
    let mut config = test_config(&server);
    config.workers.count = 1;
    config.workers.queue_size = 1;
    config.workers.checkpoint_interval = 100;
    let coordinator = coordinator(config, &state, &clock);

    Mock::given(method("GET"))
        .and(path_regex(r"^/carros/car-\d+$"))
        .respond_with(StopWhileServing(coordinator.stop_handle()))
        .mount(&server)
        .await;

    let result = tokio::time::timeout(Duration::from_secs(10), coordinator.run(RunMode::Full))
        .await
        .expect("run did not return after a stop request")
        .unwrap();

    assert!(result.processed >= 1);
    assert!(result.processed < 20);
    assert_eq!(result.metrics["cancelled"], true);
    assert_eq!(state.get_active_vehicle_ids().unwrap().len() as u64, result.success);

    let checkpoint = state.get_latest_checkpoint().unwrap().unwrap();
    assert!(!checkpoint.is_completed());
    assert_eq!(checkpoint.processed_ids().len() as u64, result.processed);
}

#[tokio::test]
async fn test_query_variants_of_one_vehicle_are_processed_once() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        &["/carros/honda-civic-101", "/carros/honda-civic-101?ref=destaque"],
    )
    .await;
    mount_detail(
        &server,
        "/carros/honda-civic-101",
        detail_page("Civic EXL", "R$ 95.990,00"),
    )
    .await;

    let clock = Arc::new(ManualClock::new());
    let state = StateManager::in_memory(clock.clone());
    let result = coordinator(test_config(&server), &state, &clock)
        .run(RunMode::Incremental)
        .await
        .unwrap();

    assert_eq!(result.metrics["discovered"], 1);
    assert_eq!(result.processed, 1);
    assert_eq!(result.success, 1);
}
