use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::services::ContentTypePolicy;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request deadline; 0 disables it
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryBackend {
    Memory,
    Sqlite,
}

impl RepositoryBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Some(RepositoryBackend::Memory),
            "sqlite" => Some(RepositoryBackend::Sqlite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_repository_backend")]
    pub backend: RepositoryBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Local,
    S3,
}

impl StorageBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Some(StorageBackend::Memory),
            "local" => Some(StorageBackend::Local),
            "s3" => Some(StorageBackend::S3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default)]
    pub s3: S3Config,
}

/// S3 or S3-compatible (MinIO) object store
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Custom endpoint, e.g. `http://localhost:9000` for MinIO
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    #[serde(default)]
    pub path_style: bool,
    /// Key prefix inside the bucket
    #[serde(default)]
    pub prefix: String,
}

impl S3Config {
    /// Configured access key, falling back to `AWS_ACCESS_KEY_ID`
    pub fn access_key_id(&self) -> Option<String> {
        self.access_key_id
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| env::var("AWS_ACCESS_KEY_ID").ok())
            .filter(|k| !k.is_empty())
    }

    /// Configured secret, falling back to `AWS_SECRET_ACCESS_KEY`
    pub fn secret_access_key(&self) -> Option<String> {
        self.secret_access_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| env::var("AWS_SECRET_ACCESS_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_url_expiry")]
    pub default_url_expiry_secs: u64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,
    #[serde(default)]
    pub content_type_policy: ContentTypePolicy,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_repository_backend() -> RepositoryBackend {
    RepositoryBackend::Sqlite
}

fn default_db_path() -> String {
    "data/simple-content.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_local_path() -> String {
    "data/objects".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_url_expiry() -> u64 {
    3600 // 1 hour
}

fn default_max_page_size() -> i64 {
    100
}

fn default_cleanup_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            backend: default_repository_backend(),
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local_path: default_local_path(),
            s3: S3Config::default(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_s3_region(),
            bucket: String::new(),
            access_key_id: None,
            secret_access_key: None,
            path_style: false,
            prefix: String::new(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            default_url_expiry_secs: default_url_expiry(),
            max_page_size: default_max_page_size(),
            cleanup_timeout_secs: default_cleanup_timeout(),
            content_type_policy: ContentTypePolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.validate()?;
        config.ensure_directories()?;
        tracing::info!(
            "Backends: repository={:?}, storage={:?}",
            config.repository.backend,
            config.storage.backend
        );
        Ok(config)
    }

    /// Load configuration from the first config file found
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "conf.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config = Self::from_toml(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    /// Format: SC_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(val: Option<String>) -> Option<T> {
            val.and_then(|v| v.trim().parse().ok())
        }

        // Server overrides
        if let Some(val) = lookup("SC_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(port) = parsed(lookup("SC_CONF_SERVER_PORT")) {
            self.server.port = port;
        }
        if let Some(secs) = parsed(lookup("SC_CONF_SERVER_REQUEST_TIMEOUT_SECS")) {
            self.server.request_timeout_secs = secs;
        }
        if let Some(bytes) = parsed(lookup("SC_CONF_SERVER_MAX_UPLOAD_BYTES")) {
            self.server.max_upload_bytes = bytes;
        }

        // Repository overrides
        if let Some(val) = lookup("SC_CONF_REPOSITORY_BACKEND") {
            match RepositoryBackend::parse(val.trim()) {
                Some(backend) => self.repository.backend = backend,
                None => tracing::warn!("Ignoring unknown repository backend: {}", val),
            }
        }
        if let Some(val) = lookup("SC_CONF_REPOSITORY_PATH") {
            self.repository.path = val;
        }
        if let Some(n) = parsed(lookup("SC_CONF_REPOSITORY_MAX_CONNECTIONS")) {
            self.repository.max_connections = n;
        }

        // Storage overrides
        if let Some(val) = lookup("SC_CONF_STORAGE_BACKEND") {
            match StorageBackend::parse(val.trim()) {
                Some(backend) => self.storage.backend = backend,
                None => tracing::warn!("Ignoring unknown storage backend: {}", val),
            }
        }
        if let Some(val) = lookup("SC_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }
        if let Some(val) = lookup("SC_CONF_STORAGE_S3_ENDPOINT") {
            self.storage.s3.endpoint = Some(val).filter(|v| !v.trim().is_empty());
        }
        if let Some(val) = lookup("SC_CONF_STORAGE_S3_REGION") {
            self.storage.s3.region = val;
        }
        if let Some(val) = lookup("SC_CONF_STORAGE_S3_BUCKET") {
            self.storage.s3.bucket = val;
        }
        if let Some(val) = lookup("SC_CONF_STORAGE_S3_ACCESS_KEY_ID") {
            self.storage.s3.access_key_id = Some(val);
        }
        if let Some(val) = lookup("SC_CONF_STORAGE_S3_SECRET_ACCESS_KEY") {
            self.storage.s3.secret_access_key = Some(val);
        }
        if let Some(v) = parsed(lookup("SC_CONF_STORAGE_S3_PATH_STYLE")) {
            self.storage.s3.path_style = v;
        }
        if let Some(val) = lookup("SC_CONF_STORAGE_S3_PREFIX") {
            self.storage.s3.prefix = val;
        }

        // Content overrides
        if let Some(secs) = parsed(lookup("SC_CONF_CONTENT_DEFAULT_URL_EXPIRY_SECS")) {
            self.content.default_url_expiry_secs = secs;
        }
        if let Some(n) = parsed(lookup("SC_CONF_CONTENT_MAX_PAGE_SIZE")) {
            self.content.max_page_size = n;
        }
        if let Some(secs) = parsed(lookup("SC_CONF_CONTENT_CLEANUP_TIMEOUT_SECS")) {
            self.content.cleanup_timeout_secs = secs;
        }
        if let Some(val) = lookup("SC_CONF_CONTENT_CONTENT_TYPE_POLICY") {
            match ContentTypePolicy::parse(val.trim()) {
                Some(policy) => self.content.content_type_policy = policy,
                None => tracing::warn!("Ignoring unknown content type policy: {}", val),
            }
        }
    }

    /// Reject settings the service cannot start with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.repository.backend == RepositoryBackend::Sqlite && self.repository.path.trim().is_empty() {
            anyhow::bail!("repository.path is required for the sqlite backend");
        }
        if self.storage.backend == StorageBackend::Local && self.storage.local_path.trim().is_empty() {
            anyhow::bail!("storage.local_path is required for the local backend");
        }
        if self.storage.backend == StorageBackend::S3 {
            let s3 = &self.storage.s3;
            if s3.bucket.trim().is_empty() {
                anyhow::bail!("storage.s3.bucket is required for the s3 backend");
            }
            if s3.access_key_id().is_none() || s3.secret_access_key().is_none() {
                anyhow::bail!("S3 credentials are required (storage.s3.* or AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY)");
            }
        }
        if self.content.max_page_size <= 0 {
            anyhow::bail!("content.max_page_size must be greater than zero");
        }
        if self.content.default_url_expiry_secs == 0 {
            anyhow::bail!("content.default_url_expiry_secs must be greater than zero");
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if self.repository.backend == RepositoryBackend::Sqlite {
            if let Some(parent) = Path::new(&self.repository.path).parent() {
                fs::create_dir_all(parent)?;
            }
        }

        if self.storage.backend == StorageBackend::Local {
            fs::create_dir_all(&self.storage.local_path)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.repository.backend, RepositoryBackend::Sqlite);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.content.default_url_expiry_secs, 3600);
        assert_eq!(config.content.max_page_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_with_partial_sections() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [storage]
            backend = "s3"

            [storage.s3]
            bucket = "media"
            endpoint = "http://localhost:9000"
            path_style = true
            access_key_id = "minio"
            secret_access_key = "minio123"

            [content]
            content_type_policy = "prefer_detected"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert!(config.storage.s3.path_style);
        assert_eq!(config.storage.s3.region, "us-east-1");
        assert_eq!(
            config.content.content_type_policy,
            ContentTypePolicy::PreferDetected
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = Config::from_toml(
            r#"
            [storage]
            backend = "ftp"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_s3_requires_bucket() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::S3;
        config.storage.s3.access_key_id = Some("a".to_string());
        config.storage.s3.secret_access_key = Some("b".to_string());
        assert!(config.validate().is_err());

        config.storage.s3.bucket = "media".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SC_CONF_SERVER_PORT", "7000"),
            ("SC_CONF_REPOSITORY_BACKEND", "memory"),
            ("SC_CONF_STORAGE_BACKEND", "MEMORY"),
            ("SC_CONF_CONTENT_MAX_PAGE_SIZE", "50"),
            ("SC_CONF_CONTENT_CONTENT_TYPE_POLICY", "reject_mismatch"),
            ("SC_CONF_SERVER_REQUEST_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.repository.backend, RepositoryBackend::Memory);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.content.max_page_size, 50);
        assert_eq!(
            config.content.content_type_policy,
            ContentTypePolicy::RejectMismatch
        );
        // Unparseable values leave the default in place
        assert_eq!(config.server.request_timeout_secs, 60);
    }
}
