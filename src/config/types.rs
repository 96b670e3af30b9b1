use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Listing-Ingest
///
/// Loaded once at startup and shared immutably (behind an `Arc`) by every
/// component of a run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where listings come from
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// First listing page(s) of the source
    #[serde(default)]
    pub start_urls: Vec<String>,

    /// Maximum number of listing pages followed per start URL
    #[serde(default = "default_max_listing_pages")]
    pub max_listing_pages: u32,

    /// Path to the selector/mapping document (built-in defaults when absent)
    #[serde(default)]
    pub selectors_path: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            start_urls: Vec::new(),
            max_listing_pages: default_max_listing_pages(),
            selectors_path: None,
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    /// Per-request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection establishment timeout (seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Retries after the first attempt for retryable failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential backoff base: wait `backoff_factor ^ attempt` seconds
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upper bound on consecutive 429 responses tolerated for one URL
    #[serde(default = "default_max_throttle_retries")]
    pub max_throttle_retries: u32,

    /// Idle pooled connections kept per host
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            user_agent: default_user_agent(),
            max_throttle_retries: default_max_throttle_retries(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

/// Politeness budget shared by every worker
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitConfig {
    /// Token bucket capacity and refill rate (tokens per minute)
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Minimum time between two consecutive requests (milliseconds)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Throughput multiplier inside business hours (0.5 doubles the delay)
    #[serde(default = "default_business_hours_factor")]
    pub business_hours_factor: f64,

    /// First local hour of the business-hours window (inclusive)
    #[serde(default = "default_business_hours_start")]
    pub business_hours_start: u32,

    /// Last local hour of the business-hours window (exclusive)
    #[serde(default = "default_business_hours_end")]
    pub business_hours_end: u32,

    /// Whether a 429 triggers the cooldown
    #[serde(default = "default_true")]
    pub respect_throttle_signals: bool,

    /// Cooldown applied after a 429 (seconds)
    #[serde(default = "default_throttle_cooldown_secs")]
    pub throttle_cooldown_secs: u64,
}

impl RateLimitConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn throttle_cooldown(&self) -> Duration {
        Duration::from_secs(self.throttle_cooldown_secs)
    }

    /// Returns true if `hour` (0-23, local time) is inside the business-hours window
    pub fn is_business_hour(&self, hour: u32) -> bool {
        hour >= self.business_hours_start && hour < self.business_hours_end
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            min_delay_ms: default_min_delay_ms(),
            business_hours_factor: default_business_hours_factor(),
            business_hours_start: default_business_hours_start(),
            business_hours_end: default_business_hours_end(),
            respect_throttle_signals: true,
            throttle_cooldown_secs: default_throttle_cooldown_secs(),
        }
    }
}

/// Worker pool and checkpoint cadence
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// Number of concurrent detail-page workers
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Capacity of the detail URL queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Items processed between two checkpoints
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// Checkpoints retained after a run
    #[serde(default = "default_checkpoints_to_keep")]
    pub checkpoints_to_keep: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_size: default_queue_size(),
            checkpoint_interval: default_checkpoint_interval(),
            checkpoints_to_keep: default_checkpoints_to_keep(),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry lifetime (hours)
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u64,

    /// Total serialized size budget (megabytes)
    #[serde(default = "default_cache_max_size_mb")]
    pub max_size_mb: u64,

    /// Entry budget used when serialized size cannot be computed
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Directory of the on-disk tier
    #[serde(default = "default_cache_directory")]
    pub directory: PathBuf,
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours as i64)
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: default_cache_ttl_hours(),
            max_size_mb: default_cache_max_size_mb(),
            max_entries: default_cache_max_entries(),
            directory: default_cache_directory(),
        }
    }
}

/// Serialization format of the run artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One pretty-printed JSON document
    #[default]
    Json,
    /// Tagged lines: run header, accepted records, rejections
    Jsonl,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path of the run artifact
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub format: OutputFormat,

    /// Gzip the artifact (adds a `.gz` suffix)
    #[serde(default)]
    pub compress: bool,

    /// Path to the SQLite state database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Optional markdown run report
    #[serde(default)]
    pub report_path: Option<PathBuf>,

    /// Directory receiving raw markup of pages that failed extraction
    #[serde(default)]
    pub debug_dump_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            format: OutputFormat::default(),
            compress: false,
            database_path: default_database_path(),
            report_path: None,
            debug_dump_dir: None,
        }
    }
}

/// Acceptance thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QualityConfig {
    /// Records below this completeness score are rejected
    #[serde(default = "default_min_completeness")]
    pub min_completeness: f64,

    /// Error rate above which the run is reported as unhealthy
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_completeness: default_min_completeness(),
            max_failure_rate: default_max_failure_rate(),
        }
    }
}

/// Logging and metrics toggles
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when no -v/-q flag is given
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Include the metrics bag in the run artifact
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            metrics: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_listing_pages() -> u32 {
    50
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_user_agent() -> String {
    "ListingIngest/1.0 (+https://example.com/bot)".to_string()
}

fn default_max_throttle_retries() -> u32 {
    5
}

fn default_pool_max_idle() -> usize {
    8
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_business_hours_factor() -> f64 {
    0.5
}

fn default_business_hours_start() -> u32 {
    9
}

fn default_business_hours_end() -> u32 {
    18
}

fn default_throttle_cooldown_secs() -> u64 {
    60
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_size() -> usize {
    100
}

fn default_checkpoint_interval() -> u64 {
    50
}

fn default_checkpoints_to_keep() -> usize {
    10
}

fn default_cache_ttl_hours() -> u64 {
    24
}

fn default_cache_max_size_mb() -> u64 {
    100
}

fn default_cache_max_entries() -> usize {
    5000
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from(".cache/listing-ingest")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("output/vehicles.json")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("state.db")
}

fn default_min_completeness() -> f64 {
    0.6
}

fn default_max_failure_rate() -> f64 {
    0.2
}

fn default_log_level() -> String {
    "listing_ingest=info,warn".to_string()
}
