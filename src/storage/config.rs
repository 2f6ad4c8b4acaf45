// Copyright 2025 Adobe. All rights reserved.
// This file is licensed to you under the Apache License,
// Version 2.0 (http://www.apache.org/licenses/LICENSE-2.0)
// or the MIT license (http://opensource.org/licenses/MIT),
// at your option.
//
// Unless required by applicable law or agreed to in writing,
// this software is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR REPRESENTATIONS OF ANY KIND, either express or
// implied. See the LICENSE-MIT and LICENSE-APACHE files for the
// specific language governing permissions and limitations under
// each license.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use super::error::{StorageError, StorageResult};
use crate::util::retry::RetryPolicy;

/// Storage backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Amazon S3
    Aws,
    /// S3-compatible object store (Minio, Ceph RGW, ...)
    Minio,
    /// Azure Blob Storage
    Azure,
    /// Google Cloud Storage
    Gcs,
    /// Directory on the local filesystem
    Local,
    /// Process-local in-memory store
    Memory,
}

/// How soon a completed write or delete is reflected in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListConsistency {
    /// Visible to every subsequent listing once the call returns.
    Strong,
    /// Visible after a backend-defined window.
    Eventual { window: Duration },
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Aws => "aws",
            StorageType::Minio => "minio",
            StorageType::Azure => "azure",
            StorageType::Gcs => "gcs",
            StorageType::Local => "local",
            StorageType::Memory => "memory",
        }
    }

    /// Listing consistency of each backend.
    ///
    /// | backend | consistency |
    /// |---------|-------------|
    /// | aws     | strong read-after-write and list-after-delete (since Dec 2020) |
    /// | minio   | strong |
    /// | azure   | strong |
    /// | gcs     | strong for object listing |
    /// | local   | strong (rename into place) |
    /// | memory  | strong |
    pub fn list_consistency(&self) -> ListConsistency {
        ListConsistency::Strong
    }

    /// Whether the transport lists keys in lexicographic order.
    ///
    /// The local filesystem walks directories in on-disk order, so each local
    /// page re-walks and sorts the matching subtree. Paging through N local
    /// keys costs O(N^2 / page_size) entry reads; raise `list_page_size` for
    /// large local trees.
    pub fn lists_in_order(&self) -> bool {
        !matches!(self, StorageType::Local)
    }

    /// Whether the transport persists object attributes such as content type.
    pub fn supports_attributes(&self) -> bool {
        !matches!(self, StorageType::Local)
    }
}

impl Display for StorageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aws" | "s3" => Ok(StorageType::Aws),
            "minio" | "s3-compatible" => Ok(StorageType::Minio),
            "azure" => Ok(StorageType::Azure),
            "gcs" | "gcp" => Ok(StorageType::Gcs),
            "local" | "file" => Ok(StorageType::Local),
            "memory" => Ok(StorageType::Memory),
            other => Err(StorageError::config(
                other,
                format!("unknown storage type '{}'", other),
            )),
        }
    }
}

/// Names of the environment surface read by [`StorageConfig::from_source`].
pub mod env {
    pub const STORAGE_TYPE: &str = "STORAGE_TYPE";
    pub const ACCOUNT_NAME: &str = "ACCOUNT_NAME";
    pub const ACCOUNT_KEY: &str = "ACCOUNT_KEY";
    pub const ACCOUNT_SECRET: &str = "ACCOUNT_SECRET";
    pub const ACCOUNT_SERVICE_URL: &str = "ACCOUNT_SERVICE_URL";
    pub const CONTAINER_NAME: &str = "CONTAINER_NAME";
    pub const ENDPOINT: &str = "ENDPOINT";
    pub const REGION: &str = "REGION";
    pub const SSL: &str = "SSL";
}

/// A source of named configuration values.
///
/// Configuration is always read through an explicit source; nothing in this
/// crate consults the process environment on its own.
pub trait ConfigSource {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Reads from an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MapSource(pub HashMap<String, String>);

impl ConfigSource for MapSource {
    fn get(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        MapSource(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Tuning options understood by the provider, with their defaults.
pub(crate) const TUNING_OPTIONS: &[&str] = &[
    "timeout",
    "connect_timeout",
    "max_retries",
    "retry_timeout",
    "retry_initial_backoff_ms",
    "retry_max_backoff_ms",
    "pool_idle_timeout",
    "pool_max_idle_per_host",
    "list_page_size",
    "multipart_threshold",
    "multipart_part_size",
    "multipart_concurrency",
    "max_single_put_size",
];

/// Connection parameters for one storage backend.
///
/// A configuration is built once, validated by
/// [`ConfigResolver`](super::resolver::ConfigResolver) and then handed to the
/// provider, which keeps its own copy and never changes it.
///
/// # Examples
///
/// ## Minio
/// ```
/// use blobstore::storage::StorageConfig;
///
/// let config = StorageConfig::minio()
///     .with_endpoint("minio.internal:9000")
///     .with_account_name("ACCESS_KEY")
///     .with_account_key("SECRET_KEY")
///     .with_container_name("uploads")
///     .with_ssl(true);
/// ```
///
/// ## Azure
/// ```
/// use blobstore::storage::StorageConfig;
///
/// let config = StorageConfig::azure()
///     .with_account_name("myaccount")
///     .with_account_key("ACCOUNT_KEY")
///     .with_service_url("https://%s.blob.core.windows.net/")
///     .with_container_name("mycontainer");
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type
    #[serde(rename = "type")]
    pub storage_type: StorageType,

    /// Account identity: access key id (S3, Minio) or storage account name (Azure)
    #[serde(default)]
    pub account_name: Option<String>,

    /// Secret credential: secret access key (S3, Minio), account key (Azure),
    /// or service account JSON / path to it (GCS)
    #[serde(default, skip_serializing)]
    pub account_key: Option<String>,

    /// Additional secret, e.g. an S3 session token
    #[serde(default, skip_serializing)]
    pub account_secret: Option<String>,

    /// Azure blob service URL template, `%s` or `{account}` is replaced by the account name
    #[serde(default)]
    pub service_url: Option<String>,

    /// Bucket or container name; the root directory for the local backend
    #[serde(default)]
    pub container_name: Option<String>,

    /// Custom endpoint, `host:port` or a full URL
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Use TLS when the endpoint does not name a scheme
    #[serde(default = "default_ssl")]
    pub ssl: bool,

    /// Tuning options (timeouts, retries, paging, multipart)
    ///
    /// - timeout: request timeout in seconds, "0" or "disabled" to turn off
    /// - connect_timeout: connect timeout in seconds
    /// - max_retries: retries for transient failures
    /// - retry_timeout: transport retry budget in seconds
    /// - retry_initial_backoff_ms / retry_max_backoff_ms: facade backoff bounds
    /// - pool_idle_timeout / pool_max_idle_per_host: connection pool
    /// - list_page_size: objects per listing round trip
    /// - multipart_threshold: uploads of unknown or larger size are streamed in parts
    /// - multipart_part_size: bytes per part
    /// - multipart_concurrency: parts in flight
    /// - max_single_put_size: largest payload a guarded upload may buffer for one request
    #[serde(default = "StorageConfig::default_options")]
    pub options: HashMap<String, String>,
}

fn default_ssl() -> bool {
    true
}

impl StorageConfig {
    /// Create a new storage configuration with default options.
    pub fn new(storage_type: StorageType) -> Self {
        Self {
            storage_type,
            account_name: None,
            account_key: None,
            account_secret: None,
            service_url: None,
            container_name: None,
            endpoint: None,
            region: None,
            ssl: true,
            options: Self::default_options(),
        }
    }

    pub fn aws() -> Self {
        Self::new(StorageType::Aws)
    }

    pub fn minio() -> Self {
        Self::new(StorageType::Minio)
    }

    pub fn azure() -> Self {
        Self::new(StorageType::Azure)
    }

    pub fn gcs() -> Self {
        Self::new(StorageType::Gcs)
    }

    /// Local filesystem storage rooted at `path`, which must exist.
    pub fn local(path: impl Into<String>) -> Self {
        Self::new(StorageType::Local).with_container_name(path)
    }

    pub fn memory() -> Self {
        Self::new(StorageType::Memory)
    }

    /// Minio defaults for a developer machine (`minioadmin` on localhost:9000, no TLS).
    ///
    /// For local testing only. These credentials are public knowledge and must
    /// never reach a production configuration.
    pub fn minio_local(container: impl Into<String>) -> Self {
        Self::minio()
            .with_endpoint("localhost:9000")
            .with_account_name("minioadmin")
            .with_account_key("minioadmin")
            .with_container_name(container)
            .with_ssl(false)
    }

    /// Build a configuration from a [`ConfigSource`].
    ///
    /// Reads `STORAGE_TYPE`, `ACCOUNT_NAME`, `ACCOUNT_KEY`, `ACCOUNT_SECRET`,
    /// `ACCOUNT_SERVICE_URL`, `CONTAINER_NAME`, `ENDPOINT`, `REGION` and `SSL`.
    /// Empty values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `STORAGE_TYPE` is missing or unknown, or `SSL`
    /// is not a boolean.
    pub fn from_source(source: &dyn ConfigSource) -> StorageResult<Self> {
        let read = |name: &str| source.get(name).filter(|v| !v.trim().is_empty());

        let storage_type: StorageType = read(env::STORAGE_TYPE)
            .ok_or_else(|| StorageError::config("unknown", "STORAGE_TYPE is required"))?
            .parse()?;

        let ssl = match read(env::SSL) {
            None => true,
            Some(value) => parse_bool(&value).ok_or_else(|| {
                StorageError::config(
                    storage_type.as_str(),
                    format!("SSL must be a boolean, got '{}'", value),
                )
            })?,
        };

        Ok(Self {
            storage_type,
            account_name: read(env::ACCOUNT_NAME),
            account_key: read(env::ACCOUNT_KEY),
            account_secret: read(env::ACCOUNT_SECRET),
            service_url: read(env::ACCOUNT_SERVICE_URL),
            container_name: read(env::CONTAINER_NAME),
            endpoint: read(env::ENDPOINT),
            region: read(env::REGION),
            ssl,
            options: Self::default_options(),
        })
    }

    /// Build a configuration from the process environment.
    pub fn from_env() -> StorageResult<Self> {
        Self::from_source(&EnvSource)
    }

    /// Get default options for all storage types.
    ///
    /// # Returns
    ///
    /// A HashMap containing default timeout, retry, connection pool, paging and
    /// multipart settings.
    pub fn default_options() -> HashMap<String, String> {
        [
            ("timeout", "1200"),
            ("connect_timeout", "30"),
            ("max_retries", "10"),
            ("retry_timeout", "1200"),
            ("retry_initial_backoff_ms", "100"),
            ("retry_max_backoff_ms", "5000"),
            ("pool_idle_timeout", "15"),
            ("pool_max_idle_per_host", "5"),
            ("list_page_size", "1000"),
            ("multipart_threshold", "16777216"),
            ("multipart_part_size", "8388608"),
            ("multipart_concurrency", "8"),
            ("max_single_put_size", "5368709120"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    pub fn with_account_name(mut self, value: impl Into<String>) -> Self {
        self.account_name = Some(value.into());
        self
    }

    pub fn with_account_key(mut self, value: impl Into<String>) -> Self {
        self.account_key = Some(value.into());
        self
    }

    pub fn with_account_secret(mut self, value: impl Into<String>) -> Self {
        self.account_secret = Some(value.into());
        self
    }

    pub fn with_service_url(mut self, value: impl Into<String>) -> Self {
        self.service_url = Some(value.into());
        self
    }

    pub fn with_container_name(mut self, value: impl Into<String>) -> Self {
        self.container_name = Some(value.into());
        self
    }

    pub fn with_endpoint(mut self, value: impl Into<String>) -> Self {
        self.endpoint = Some(value.into());
        self
    }

    pub fn with_region(mut self, value: impl Into<String>) -> Self {
        self.region = Some(value.into());
        self
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Add a tuning option.
    ///
    /// # Arguments
    ///
    /// * `key` - The option key
    /// * `value` - The option value
    ///
    /// # Returns
    ///
    /// The `StorageConfig` instance with the added option (for method chaining).
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Add multiple tuning options.
    pub fn with_options(mut self, options: HashMap<String, String>) -> Self {
        self.options.extend(options);
        self
    }

    pub fn get_option(&self, key: &str) -> Option<&String> {
        self.options.get(key)
    }

    pub fn storage_type_str(&self) -> &str {
        self.storage_type.as_str()
    }

    /// Parse a numeric option, falling back to `default` when unset.
    ///
    /// Malformed values are reported by the resolver before a provider exists,
    /// so the fallback only covers the unset case in practice.
    pub(crate) fn numeric_option<T: FromStr>(&self, key: &str, default: T) -> T {
        self.options
            .get(key)
            .and_then(|s| s.trim().parse::<T>().ok())
            .unwrap_or(default)
    }

    /// Facade-level retry policy from the retry options.
    pub fn retry_policy(&self) -> RetryPolicy {
        let default = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.numeric_option("max_retries", default.max_retries),
            initial_backoff: Duration::from_millis(self.numeric_option(
                "retry_initial_backoff_ms",
                default.initial_backoff.as_millis() as u64,
            )),
            max_backoff: Duration::from_millis(self.numeric_option(
                "retry_max_backoff_ms",
                default.max_backoff.as_millis() as u64,
            )),
        }
    }
}

impl Debug for StorageConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn redact(value: &Option<String>) -> Option<&'static str> {
            value.as_ref().map(|_| "***")
        }

        f.debug_struct("StorageConfig")
            .field("storage_type", &self.storage_type)
            .field("account_name", &self.account_name)
            .field("account_key", &redact(&self.account_key))
            .field("account_secret", &redact(&self.account_secret))
            .field("service_url", &self.service_url)
            .field("container_name", &self.container_name)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("ssl", &self.ssl)
            .field("options", &self.options)
            .finish()
    }
}

impl From<StorageConfig> for String {
    fn from(config: StorageConfig) -> Self {
        config.storage_type_str().to_string()
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
