use crate::config::selectors::{SelectorConfig, SelectorDocument};
use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a settings file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML settings file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use listing_ingest::config::load_config;
///
/// let config = load_config(Path::new("ingest.toml")).unwrap();
/// println!("Workers: {}", config.workers.count);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the settings file content
///
/// Recorded in each run's metrics to tell which settings produced a result.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a settings file and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Loads the selector/mapping document
///
/// With no path, the built-in selectors, patterns and mapping tables are used.
/// Every selector, pattern and mapping target is compiled here, so a broken
/// document is reported before any request is made.
pub fn load_selectors(path: Option<&Path>) -> Result<SelectorConfig, ConfigError> {
    let document = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<SelectorDocument>(&content)?
        }
        None => SelectorDocument::default(),
    };

    SelectorConfig::from_document(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[source]
start-urls = ["https://www.example.com/carros"]
max-listing-pages = 5

[http]
timeout-secs = 20
max-retries = 2

[rate-limit]
requests-per-minute = 20
throttle-cooldown-secs = 90

[workers]
count = 2
queue-size = 10

[output]
path = "out/vehicles.jsonl"
format = "jsonl"
compress = true

[quality]
min-completeness = 0.7
max-failure-rate = 0.1
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.source.start_urls.len(), 1);
        assert_eq!(config.source.max_listing_pages, 5);
        assert_eq!(config.http.timeout_secs, 20);
        assert_eq!(config.http.max_retries, 2);
        assert_eq!(config.rate_limit.requests_per_minute, 20);
        assert_eq!(config.rate_limit.throttle_cooldown_secs, 90);
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.output.format, OutputFormat::Jsonl);
        assert!(config.output.compress);
        assert_eq!(config.quality.min_completeness, 0.7);
        // untouched sections keep their defaults
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_hours, 24);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = create_temp_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.rate_limit.requests_per_minute, 30);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/ingest.toml"));
        assert!(matches!(result.unwrap_err(), ConfigError::Io(_)));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[quality]
min-completeness = 0.05
max-failure-rate = 0.95
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_load_selectors_from_file() {
        let file = create_temp_config(
            r#"
images = ["div.photos img@data-src"]

[fields]
name = ["h2.headline"]
"#,
        );

        let selectors = load_selectors(Some(file.path())).unwrap();
        assert_eq!(selectors.field_strategies("name")[0].as_str(), "h2.headline");
        assert_eq!(
            selectors.image_strategies()[0].as_str(),
            "div.photos img@data-src"
        );
    }

    #[test]
    fn test_load_selectors_builtin() {
        let selectors = load_selectors(None).unwrap();
        assert!(!selectors.listing_link_strategies().is_empty());
    }

    #[test]
    fn test_load_selectors_rejects_bad_selector() {
        let file = create_temp_config(
            r#"
[fields]
price = ["div[["]
"#,
        );
        let result = load_selectors(Some(file.path()));
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidSelector { .. }
        ));
    }
}
