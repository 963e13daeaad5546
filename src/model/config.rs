use serde::Deserialize;
use std::fs;
use std::path::Path;

const ENV_CONFIG_PATH: &str = "RADAR_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const ENV_CONSUMER_NAME: &str = "RADAR_CONSUMER_NAME";
const ENV_REGEX_THRESHOLD: &str = "RADAR_REGEX_THRESHOLD";
const ENV_AUTO_ACCEPT_THRESHOLD: &str = "RADAR_AUTO_ACCEPT_THRESHOLD";
const ENV_LLM_TIMEOUT_SECS: &str = "RADAR_LLM_TIMEOUT_SECS";
const ENV_FILTER_MODEL: &str = "RADAR_FILTER_MODEL";
const ENV_EXTRACTION_MODEL: &str = "RADAR_EXTRACTION_MODEL";
const ENV_ANALYSIS_MODEL: &str = "RADAR_ANALYSIS_MODEL";
const ENV_AUDIT_DIR: &str = "RADAR_AUDIT_DIR";

/// Thresholds for the two-stage relevance filter
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Pre-filter scores below this are rejected without a model call
    pub regex_threshold: u32,
    /// Pre-filter scores at or above this are accepted without a model call
    pub auto_accept_threshold: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            regex_threshold: 30,
            auto_accept_threshold: 70,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub pending_stream: String,
    pub analyzed_stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
    /// How long a group read waits for new entries
    pub block_ms: u64,
    /// Entries fetched per group read
    pub read_count: usize,
    /// Pending entries idle for longer than this are reclaimed from dead consumers
    pub reclaim_min_idle_ms: u64,
    pub reclaim_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pending_stream: "papers:pending".to_string(),
            analyzed_stream: "papers:analyzed".to_string(),
            consumer_group: "agent_group".to_string(),
            consumer_name: "agent_worker_1".to_string(),
            block_ms: 5000,
            read_count: 1,
            reclaim_min_idle_ms: 60_000,
            reclaim_interval_secs: 60,
        }
    }
}

/// Model names per role
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub filter_model: String,
    pub extraction_model: String,
    pub analysis_model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            filter_model: "gpt-4o-mini".to_string(),
            extraction_model: "gpt-4o-mini".to_string(),
            analysis_model: "gpt-4o".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CuratorConfig {
    /// Run the curator after this many successful analyses
    pub every: u32,
    /// Number of most recent analyzed entries fed into one briefing
    pub batch_size: usize,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            every: 10,
            batch_size: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub days_back: u32,
    pub max_results: usize,
    pub interval_secs: u64,
    /// arXiv categories queried by the feed source
    pub categories: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            days_back: 1,
            max_results: 30,
            interval_secs: 6 * 60 * 60,
            categories: ["cs.CR", "cs.AI", "cs.LG", "cs.CL"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub curator: CuratorConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub audit_dir: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub filter: FilterConfig,
    pub queue: QueueConfig,
    pub llm: LlmConfig,
    pub curator: CuratorConfig,
    pub ingestion: IngestionConfig,
    pub audit_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file(ConfigFile::default(), 8080, "127.0.0.1".to_string())
    }
}

impl Config {
    /// Load configuration from environment and config file
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let config_path = std::env::var(ENV_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let file = Self::load_config_file(&config_path).unwrap_or_default();
        let mut config = Self::from_file(file, port, host);
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    fn from_file(file: ConfigFile, port: u16, host: String) -> Self {
        Self {
            port,
            host,
            filter: file.filter,
            queue: file.queue,
            llm: file.llm,
            curator: file.curator,
            ingestion: file.ingestion,
            audit_dir: file.audit_dir,
        }
    }

    /// Apply the environment variables that take precedence over the file
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup(ENV_CONSUMER_NAME).filter(|n| !n.trim().is_empty()) {
            self.queue.consumer_name = name;
        }
        if let Some(v) = lookup(ENV_REGEX_THRESHOLD).and_then(|v| v.parse().ok()) {
            self.filter.regex_threshold = v;
        }
        if let Some(v) = lookup(ENV_AUTO_ACCEPT_THRESHOLD).and_then(|v| v.parse().ok()) {
            self.filter.auto_accept_threshold = v;
        }
        if let Some(v) = lookup(ENV_LLM_TIMEOUT_SECS).and_then(|v| v.parse().ok()) {
            self.llm.timeout_secs = v;
        }
        if let Some(model) = lookup(ENV_FILTER_MODEL) {
            self.llm.filter_model = model;
        }
        if let Some(model) = lookup(ENV_EXTRACTION_MODEL) {
            self.llm.extraction_model = model;
        }
        if let Some(model) = lookup(ENV_ANALYSIS_MODEL) {
            self.llm.analysis_model = model;
        }
        if let Some(dir) = lookup(ENV_AUDIT_DIR) {
            self.audit_dir = Some(dir);
        }
    }

    /// Load configuration from YAML file
    fn load_config_file(path: &str) -> Option<ConfigFile> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => Self::parse_config(path, &contents),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                None
            }
        }
    }

    fn parse_config(path: &Path, contents: &str) -> Option<ConfigFile> {
        let contents = contents.trim();
        if contents.is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Some(ConfigFile::default());
        }

        match serde_yaml::from_str(contents) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded configuration from file");
                Some(config)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                None
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.filter.regex_threshold, 30);
        assert_eq!(config.filter.auto_accept_threshold, 70);
        assert_eq!(config.queue.pending_stream, "papers:pending");
        assert_eq!(config.queue.analyzed_stream, "papers:analyzed");
        assert_eq!(config.queue.consumer_group, "agent_group");
        assert_eq!(config.queue.consumer_name, "agent_worker_1");
        assert_eq!(config.curator.every, 10);
        assert_eq!(config.curator.batch_size, 20);
        assert_eq!(config.ingestion.interval_secs, 21_600);
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
filter:
  regex_threshold: 25
queue:
  consumer_name: worker-b
curator:
  every: 5
"#;
        let config = Config::parse_config(Path::new("inline.yaml"), yaml).unwrap();
        assert_eq!(config.filter.regex_threshold, 25);
        assert_eq!(config.filter.auto_accept_threshold, 70);
        assert_eq!(config.queue.consumer_name, "worker-b");
        assert_eq!(config.queue.pending_stream, "papers:pending");
        assert_eq!(config.curator.every, 5);
        assert_eq!(config.curator.batch_size, 20);
    }

    #[test]
    fn test_invalid_yaml_falls_back() {
        assert!(Config::parse_config(Path::new("bad.yaml"), "filter: [not, a, map").is_none());
        assert!(Config::parse_config(Path::new("empty.yaml"), "   \n").is_some());
    }

    #[test]
    fn test_load_config_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "audit_dir: /tmp/radar\nllm:\n  timeout_secs: 12").unwrap();

        let loaded = Config::load_config_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(loaded.audit_dir.as_deref(), Some("/tmp/radar"));
        assert_eq!(loaded.llm.timeout_secs, 12);

        assert!(Config::load_config_file("/nonexistent/radar.yaml").is_none());
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            (ENV_CONSUMER_NAME, "agent_worker_7"),
            (ENV_REGEX_THRESHOLD, "40"),
            (ENV_AUTO_ACCEPT_THRESHOLD, "not-a-number"),
            (ENV_ANALYSIS_MODEL, "gpt-4.1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.queue.consumer_name, "agent_worker_7");
        assert_eq!(config.filter.regex_threshold, 40);
        assert_eq!(config.filter.auto_accept_threshold, 70);
        assert_eq!(config.llm.analysis_model, "gpt-4.1");
    }
}
