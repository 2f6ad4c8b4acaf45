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

use super::config::{StorageConfig, StorageType};
use super::context::{CallContext, CallGuard};
use super::error::{StorageError, StorageResult};
use super::key::{check_prefix, prefix_parent, ObjectKey};
use super::listing::{classify, into_page, paginate, ListCursor, ListOptions, ListPage, PrefixMatch};
use super::provider::{
    check_content_type, DeleteOptions, DownloadOptions, ObjectMetadata, StorageProvider,
    UploadOptions, UploadPrecondition, UploadReceipt, VersionToken, DEFAULT_CONTENT_TYPE,
};
use super::resolver::{endpoint_url, service_url, ConfigResolver};
use super::transfer::{buffer_source, upload_parts, BodyReader, ObjectDownload, UploadSource};
use crate::util::retry::{retry_with_policy, RetryPolicy};
use crate::util::util::measure_dur_async;
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use object_store::list::{PaginatedListOptions, PaginatedListStore};
use object_store::path::Path as ObjectPath;
use object_store::{
    aws::AmazonS3Builder, azure::MicrosoftAzureBuilder, gcp::GoogleCloudStorageBuilder,
    local::LocalFileSystem, memory::InMemory, Attribute, Attributes, BackoffConfig,
    ClientOptions, GetOptions, GetRange, ObjectMeta, ObjectStore, ObjectStoreExt, PutMode,
    PutMultipartOptions, PutOptions, PutPayload, RetryConfig, UpdateVersion,
};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};
use url::Url;

/// Region used for S3-compatible stores that do not care about one.
const DEFAULT_S3_REGION: &str = "us-east-1";

/// HEAD requests in flight when filling content types for a listing page.
const HEAD_CONCURRENCY: usize = 8;

/// A built backend: the store, its server-side pager if it has one, and the
/// base URI of its container.
struct Transport {
    store: Arc<dyn ObjectStore>,
    pager: Option<Arc<dyn PaginatedListStore>>,
    base_path: String,
}

impl Transport {
    /// A store whose listing is paged with a continuation token per request.
    fn paged<S: ObjectStore + PaginatedListStore>(store: S, base_path: String) -> Self {
        let store = Arc::new(store);
        let pager: Arc<dyn PaginatedListStore> = store.clone();
        Self {
            store,
            pager: Some(pager),
            base_path,
        }
    }

    fn unpaged<S: ObjectStore>(store: S, base_path: String) -> Self {
        Self {
            store: Arc::new(store),
            pager: None,
            base_path,
        }
    }
}

/// Storage provider that works with any object_store backend
pub struct ObjectStoreProvider {
    config: StorageConfig,
    store: Arc<dyn ObjectStore>,
    /// Server-side pager for S3, Azure and GCS; local and memory walk the store.
    pager: Option<Arc<dyn PaginatedListStore>>,
    base_path: String,
    retry_policy: RetryPolicy,
    list_page_size: usize,
    multipart_threshold: u64,
    multipart_part_size: usize,
    multipart_concurrency: usize,
    max_single_put_size: u64,
}

impl ObjectStoreProvider {
    /// Create a new storage provider from configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Storage configuration specifying the backend and its credentials
    ///
    /// # Returns
    ///
    /// A `Result` containing:
    /// * `Ok(ObjectStoreProvider)` - A provider bound to exactly one backend
    /// * `Err(StorageError)` - If the configuration is invalid
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The configuration fails validation (every problem is listed)
    /// * The object store backend cannot be created
    ///
    /// No network request is made; use
    /// [`validate_connection`](StorageProvider::validate_connection) for that.
    pub async fn new(config: StorageConfig) -> StorageResult<Self> {
        ConfigResolver::validate(&config)?;
        let transport = Self::build_store(&config)?;

        let provider = Self {
            retry_policy: config.retry_policy(),
            list_page_size: config.numeric_option("list_page_size", 1000usize).max(1),
            multipart_threshold: config.numeric_option("multipart_threshold", 16 * 1024 * 1024u64),
            multipart_part_size: config
                .numeric_option("multipart_part_size", 8 * 1024 * 1024usize)
                .max(1),
            multipart_concurrency: config.numeric_option("multipart_concurrency", 8usize).max(1),
            max_single_put_size: config
                .numeric_option("max_single_put_size", 5 * 1024 * 1024 * 1024u64)
                .max(1),
            store: transport.store,
            pager: transport.pager,
            base_path: transport.base_path,
            config,
        };

        info!(
            "Created storage provider type={}, base_path={}",
            provider.config.storage_type, provider.base_path
        );
        Ok(provider)
    }

    /// Build the appropriate object store based on configuration.
    ///
    /// # Returns
    ///
    /// The object store, its pager when listing is paged server-side, and the
    /// base URI of its container.
    fn build_store(config: &StorageConfig) -> StorageResult<Transport> {
        match config.storage_type {
            StorageType::Aws | StorageType::Minio => Self::build_s3_store(config),
            StorageType::Azure => Self::build_azure_store(config),
            StorageType::Gcs => Self::build_gcs_store(config),
            StorageType::Local => Self::build_local_store(config),
            StorageType::Memory => Ok(Transport::unpaged(InMemory::new(), "memory://".to_string())),
        }
    }

    /// Build a local filesystem store rooted at `container_name`.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The path cannot be canonicalized (doesn't exist or permission denied)
    /// * The path is not a directory
    fn build_local_store(config: &StorageConfig) -> StorageResult<Transport> {
        let path = required(config, &config.container_name, "container_name")?;

        // Canonicalize the path (handles both relative and absolute paths, resolves symlinks)
        let canonical_path = PathBuf::from(path).canonicalize().map_err(|e| {
            StorageError::config(
                "local",
                format!("failed to resolve path '{}': {} (path must exist)", path, e),
            )
        })?;

        if !canonical_path.is_dir() {
            return Err(StorageError::config(
                "local",
                format!("base path is not a directory: {}", canonical_path.display()),
            ));
        }

        let store = LocalFileSystem::new_with_prefix(&canonical_path).map_err(|e| {
            StorageError::config("local", format!("failed to create local store: {}", e))
        })?;

        let base_path_str = canonical_path.to_string_lossy().to_string();
        Ok(Transport::unpaged(store, base_path_str))
    }

    /// Build connection options from configuration.
    ///
    /// # Returns
    ///
    /// A `ClientOptions` instance configured with timeout and connection pool
    /// settings from the config.
    fn build_connection_options(config: &StorageConfig) -> ClientOptions {
        let mut client_options = ClientOptions::default();
        if let Some(timeout_str) = config.options.get("timeout") {
            if timeout_str == "0" || timeout_str == "disabled" {
                client_options = client_options.with_timeout_disabled();
            } else if let Ok(sec) = timeout_str.parse::<u64>() {
                client_options = client_options.with_timeout(Duration::from_secs(sec))
            }
        };
        if let Some(connect_timeout_str) = config.options.get("connect_timeout") {
            if connect_timeout_str == "0" || connect_timeout_str == "disabled" {
                client_options = client_options.with_connect_timeout_disabled();
            } else if let Ok(sec) = connect_timeout_str.parse::<u64>() {
                client_options = client_options.with_connect_timeout(Duration::from_secs(sec))
            }
        }
        if let Some(pool_idle_timeout_str) = config.options.get("pool_idle_timeout") {
            if let Ok(sec) = pool_idle_timeout_str.parse::<u64>() {
                client_options = client_options.with_pool_idle_timeout(Duration::from_secs(sec))
            }
        }
        if let Some(pool_max_idle_per_host_str) = config.options.get("pool_max_idle_per_host") {
            if let Ok(max_idle) = pool_max_idle_per_host_str.parse::<usize>() {
                client_options = client_options.with_pool_max_idle_per_host(max_idle)
            }
        }
        if let Some(endpoint) = &config.endpoint {
            if endpoint_url(endpoint, config.ssl).starts_with("http://") {
                client_options = client_options.with_allow_http(true);
            }
        }
        client_options
    }

    /// Build the transport's HTTP retry options from configuration.
    ///
    /// Uses the same retry count and backoff bounds as the facade policy.
    fn build_retry_options(config: &StorageConfig) -> RetryConfig {
        let default_retry_config = RetryConfig::default();
        let policy = config.retry_policy();
        let retry_timeout = config
            .options
            .get("retry_timeout")
            .and_then(|s| Some(Duration::from_secs(s.parse::<u64>().ok()?)))
            .unwrap_or(default_retry_config.retry_timeout);
        RetryConfig {
            backoff: BackoffConfig {
                init_backoff: policy.initial_backoff,
                max_backoff: policy.max_backoff,
                base: 2.0,
            },
            max_retries: policy.max_retries,
            retry_timeout,
        }
    }

    /// Build an S3 store, for AWS or an S3-compatible endpoint such as Minio.
    ///
    /// Credentials come from the configuration only; nothing is read from the
    /// environment or instance metadata.
    fn build_s3_store(config: &StorageConfig) -> StorageResult<Transport> {
        let backend = config.storage_type_str();
        let bucket = required(config, &config.container_name, "container_name")?;
        let access_key_id = required(config, &config.account_name, "account_name")?;
        let secret_access_key = required(config, &config.account_key, "account_key")?;

        let mut builder = AmazonS3Builder::new()
            .with_client_options(Self::build_connection_options(config))
            .with_retry(Self::build_retry_options(config))
            .with_bucket_name(bucket)
            .with_access_key_id(access_key_id)
            .with_secret_access_key(secret_access_key)
            .with_region(config.region.as_deref().unwrap_or(DEFAULT_S3_REGION));

        if let Some(token) = &config.account_secret {
            builder = builder.with_token(token);
        }

        let endpoint = config
            .endpoint
            .as_deref()
            .map(|endpoint| endpoint_url(endpoint, config.ssl));
        if let Some(url) = &endpoint {
            builder = builder
                .with_endpoint(url)
                .with_allow_http(url.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }

        let store = builder.build().map_err(|e| {
            StorageError::config(backend, format!("failed to create S3 store: {}", e))
        })?;

        let base_url = match endpoint {
            Some(url) => format!("{}/{}", url, bucket),
            None => format!("s3://{}", bucket),
        };

        Ok(Transport::paged(store, base_url))
    }

    /// Build an Azure Blob Storage store authenticated with the account key.
    fn build_azure_store(config: &StorageConfig) -> StorageResult<Transport> {
        let account_name = required(config, &config.account_name, "account_name")?;
        let account_key = required(config, &config.account_key, "account_key")?;
        let container = required(config, &config.container_name, "container_name")?;
        let template = required(config, &config.service_url, "service_url")?;
        let endpoint = service_url(template, account_name);

        let store = MicrosoftAzureBuilder::new()
            .with_client_options(Self::build_connection_options(config))
            .with_retry(Self::build_retry_options(config))
            .with_account(account_name)
            .with_access_key(account_key)
            .with_container_name(container)
            .with_endpoint(endpoint.clone())
            .with_allow_http(endpoint.starts_with("http://"))
            .build()
            .map_err(|e| {
                StorageError::config("azure", format!("failed to create Azure store: {}", e))
            })?;

        Ok(Transport::paged(store, format!("{}/{}", endpoint, container)))
    }

    /// Build a GCS store.
    ///
    /// `account_key` holds either the service account JSON itself or a path to it.
    fn build_gcs_store(config: &StorageConfig) -> StorageResult<Transport> {
        let bucket = required(config, &config.container_name, "container_name")?;
        let account_key = required(config, &config.account_key, "account_key")?;

        let mut builder = GoogleCloudStorageBuilder::new()
            .with_client_options(Self::build_connection_options(config))
            .with_retry(Self::build_retry_options(config))
            .with_bucket_name(bucket);
        builder = if account_key.trim_start().starts_with('{') {
            builder.with_service_account_key(account_key)
        } else {
            builder.with_service_account_path(account_key)
        };

        if config.endpoint.is_some() {
            warn!("Ignoring endpoint for GCS bucket={}", bucket);
        }

        let store = builder.build().map_err(|e| {
            StorageError::config("gcs", format!("failed to create GCS store: {}", e))
        })?;

        Ok(Transport::paged(store, format!("gs://{}", bucket)))
    }

    /// Retry wrapper for idempotent operations that may fail due to transient
    /// network errors.
    async fn retry_operation<F, Fut, T>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        retry_with_policy(&self.retry_policy, operation_name, operation).await
    }

    fn key(&self, key: &str) -> StorageResult<ObjectKey> {
        ObjectKey::parse(self.config.storage_type, key)
    }

    fn attributes(&self, content_type: &str) -> Attributes {
        let mut attributes = Attributes::new();
        // the local store rejects any attribute
        if self.config.storage_type.supports_attributes() {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        attributes
    }

    fn put_options(&self, options: &UploadOptions) -> PutOptions {
        let mode = match &options.precondition {
            UploadPrecondition::Overwrite => PutMode::Overwrite,
            UploadPrecondition::IfAbsent => PutMode::Create,
            UploadPrecondition::IfMatch(version) => PutMode::Update(UpdateVersion {
                e_tag: version.e_tag.clone(),
                version: version.version.clone(),
            }),
        };
        PutOptions {
            mode,
            attributes: self.attributes(&options.content_type),
            ..Default::default()
        }
    }

    /// Metadata for one object, including its content type where the backend
    /// records one.
    async fn head_object(&self, path: &ObjectPath) -> StorageResult<ObjectMetadata> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .store
            .get_opts(path, options)
            .await
            .map_err(StorageError::from_backend)?;
        let content_type = content_type_of(&result.attributes);
        Ok(to_metadata(result.meta, content_type))
    }

    /// Send a payload in one request.
    ///
    /// Guarded writes are retried: a replayed request cannot clobber a newer
    /// object because the precondition is evaluated again.
    async fn upload_single(
        &self,
        key: &ObjectKey,
        source: UploadSource,
        options: &UploadOptions,
    ) -> StorageResult<UploadReceipt> {
        let payload = buffer_source(source, self.max_single_put_size).await?;
        let size = payload.len() as u64;
        let put_options = self.put_options(options);
        let policy = match options.precondition {
            UploadPrecondition::Overwrite => RetryPolicy::none(),
            _ => self.retry_policy,
        };

        let store = &self.store;
        let path = key.path();
        let result = retry_with_policy(&policy, &format!("upload({})", key), move || {
            let payload = PutPayload::from(payload.clone());
            let put_options = put_options.clone();
            async move {
                store
                    .put_opts(path, payload, put_options)
                    .await
                    .map_err(StorageError::from_backend)
            }
        })
        .await?;

        debug!("Uploaded key={}, size={}, mode=single", key, size);
        Ok(UploadReceipt {
            key: key.to_string(),
            size,
            version: VersionToken::from_parts(result.e_tag, result.version),
        })
    }

    /// Stream a payload as a multipart upload.
    ///
    /// The object only appears once the upload completes. Any failure,
    /// cancellation or timeout before the completion request aborts the upload
    /// before returning.
    async fn upload_multipart(
        &self,
        key: &ObjectKey,
        source: UploadSource,
        options: &UploadOptions,
        guard: &CallGuard,
    ) -> StorageResult<UploadReceipt> {
        let (mut reader, declared): (Box<dyn AsyncRead + Send + Unpin>, Option<u64>) = match source
        {
            UploadSource::Bytes(bytes) => {
                let size = bytes.len() as u64;
                (Box::new(std::io::Cursor::new(bytes)), Some(size))
            }
            UploadSource::Reader { reader, size } => (reader, size),
        };

        let multipart_options = PutMultipartOptions {
            attributes: self.attributes(&options.content_type),
            ..Default::default()
        };
        let upload = guard
            .run(async {
                self.store
                    .put_multipart_opts(key.path(), multipart_options)
                    .await
                    .map_err(StorageError::from_backend)
            })
            .await?;

        let (size, result) = upload_parts(
            upload,
            reader.as_mut(),
            declared,
            self.multipart_part_size,
            self.multipart_concurrency,
            guard,
            key.as_str(),
        )
        .await?;

        debug!("Uploaded key={}, size={}, mode=multipart", key, size);
        Ok(UploadReceipt {
            key: key.to_string(),
            size,
            version: VersionToken::from_parts(result.e_tag, result.version),
        })
    }

    async fn upload_guarded(
        &self,
        key: &ObjectKey,
        source: UploadSource,
        options: &UploadOptions,
        guard: &CallGuard,
    ) -> StorageResult<UploadReceipt> {
        // multipart uploads cannot carry a precondition, so guarded payloads
        // are buffered for one request up to `max_single_put_size`
        let single_limit = self.multipart_threshold.min(self.max_single_put_size);
        let single = options.precondition != UploadPrecondition::Overwrite
            || matches!(source.declared_size(), Some(size) if size <= single_limit);

        if single {
            guard.run(self.upload_single(key, source, options)).await
        } else {
            self.upload_multipart(key, source, options, guard).await
        }
    }

    /// Open the object body at `offset`.
    ///
    /// An offset equal to the size yields an empty body; one past it is
    /// `InvalidInput`.
    async fn open(
        &self,
        key: &ObjectKey,
        offset: u64,
        guard: &CallGuard,
    ) -> StorageResult<ObjectDownload> {
        let name = format!("download({})", key);
        let path = key.path();
        let mut options = GetOptions::default();

        if offset > 0 {
            // transports reject a range starting at or past the end
            let current = self
                .retry_operation(&name, || self.head_object(path))
                .await?;
            if offset > current.size {
                return Err(StorageError::InvalidInput(format!(
                    "offset {} is past the end of {} ({} bytes)",
                    offset, key, current.size
                )));
            }
            if offset == current.size {
                return Ok(ObjectDownload::new(current, stream::empty().boxed()));
            }
            options.range = Some(GetRange::Offset(offset));
            options.if_match = current.version.and_then(|version| version.e_tag);
        }

        let store = &self.store;
        let result = self
            .retry_operation(&name, move || {
                let options = options.clone();
                async move {
                    store
                        .get_opts(path, options)
                        .await
                        .map_err(StorageError::from_backend)
                }
            })
            .await?;

        let content_type = content_type_of(&result.attributes);
        let range = result.range.clone();
        let e_tag = result.meta.e_tag.clone();
        let metadata = to_metadata(result.meta.clone(), content_type);

        let body = BodyReader {
            store: Arc::clone(&self.store),
            path: path.clone(),
            e_tag,
            offset: range.start,
            end: range.end,
            body: Some(result.into_stream()),
            policy: self.retry_policy,
            guard: guard.clone(),
        };
        Ok(ObjectDownload::new(metadata, body.into_stream()))
    }

    async fn delete_guarded(&self, key: &ObjectKey, options: &DeleteOptions) -> StorageResult<()> {
        let name = format!("delete({})", key);

        if let Some(expected) = &options.if_match {
            // no transport offers a conditional delete; compare against a fresh HEAD
            let current = self
                .retry_operation(&name, || self.head_object(key.path()))
                .await;
            match current {
                Err(StorageError::NotFound { .. }) => return Ok(()),
                Err(e) => return Err(e),
                Ok(current) if !version_matches(expected, current.version.as_ref()) => {
                    return Err(StorageError::PreconditionFailed {
                        key: key.to_string(),
                        reason: "stored version does not match".to_string(),
                    });
                }
                Ok(_) => {}
            }
        }

        let store = &self.store;
        let path = key.path();
        self.retry_operation(&name, move || async move {
            match store.delete(path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(StorageError::from_backend(e)),
            }
        })
        .await
    }

    /// One page from a server-side pager: a single request carrying the
    /// prefix, the page size and the continuation token.
    async fn fetch_server_page(
        &self,
        pager: &dyn PaginatedListStore,
        prefix: &str,
        cursor: Option<&ListCursor>,
        page_size: usize,
    ) -> StorageResult<(Vec<ObjectMeta>, Option<ListCursor>)> {
        let page_token = cursor.and_then(ListCursor::page_token);
        let options = PaginatedListOptions {
            max_keys: Some(page_size),
            page_token: page_token.map(str::to_string),
            // a cursor without a token resumes after its last key
            offset: cursor
                .filter(|_| page_token.is_none())
                .map(|cursor| cursor.last_key().to_string()),
            ..Default::default()
        };

        let response = pager
            .list_paginated((!prefix.is_empty()).then_some(prefix), options)
            .await
            .map_err(StorageError::from_backend)?;
        let mut objects = response.result.objects;
        objects.sort_by(|a, b| a.location.cmp(&b.location));

        let next_cursor = response.page_token.map(|token| {
            let last_key = objects
                .last()
                .map(|meta| meta.location.to_string())
                .or_else(|| cursor.map(|cursor| cursor.last_key().to_string()))
                .unwrap_or_default();
            ListCursor::new(prefix, last_key).with_page_token(token)
        });
        Ok((objects, next_cursor))
    }

    /// Up to `page_size + 1` objects inside `prefix` that sort after `after`,
    /// in key order.
    ///
    /// Walks the store's own listing; used where no server-side pager exists.
    async fn fetch_page(
        &self,
        prefix: &str,
        after: Option<&str>,
        page_size: usize,
    ) -> StorageResult<Vec<ObjectMeta>> {
        let parent = prefix_parent(prefix)?;
        let limit = page_size.saturating_add(1);

        let mut listing = match after {
            Some(offset) => {
                let offset = ObjectPath::parse(offset).map_err(|e| {
                    StorageError::InvalidInput(format!("invalid list cursor: {}", e))
                })?;
                self.store.list_with_offset(parent.as_ref(), &offset)
            }
            None => self.store.list(parent.as_ref()),
        };

        if self.config.storage_type.lists_in_order() {
            let mut objects = Vec::with_capacity(limit.min(1024));
            while let Some(meta) = listing.next().await {
                let meta = meta.map_err(StorageError::from_backend)?;
                match classify(meta.location.as_ref(), prefix) {
                    PrefixMatch::Before => continue,
                    PrefixMatch::Inside => {
                        objects.push(meta);
                        if objects.len() >= limit {
                            break;
                        }
                    }
                    PrefixMatch::After => break,
                }
            }
            Ok(objects)
        } else {
            let mut objects: Vec<ObjectMeta> = listing
                .map_err(StorageError::from_backend)
                .try_filter(|meta| future::ready(meta.location.as_ref().starts_with(prefix)))
                .try_collect()
                .await?;
            objects.sort_by(|a, b| a.location.cmp(&b.location));
            objects.truncate(limit);
            Ok(objects)
        }
    }

    async fn describe(&self, meta: ObjectMeta) -> StorageResult<ObjectMetadata> {
        match self.head_object(&meta.location).await {
            Ok(described) => Ok(described),
            // deleted since it was listed
            Err(StorageError::NotFound { .. }) => Ok(to_metadata(meta, None)),
            Err(e) => Err(e),
        }
    }

    async fn list_page_guarded(
        &self,
        prefix: &str,
        cursor: Option<&ListCursor>,
        options: &ListOptions,
        guard: &CallGuard,
    ) -> StorageResult<ListPage> {
        check_prefix(prefix)?;
        if let Some(cursor) = cursor {
            cursor.check_prefix(prefix)?;
        }
        let page_size = options.page_size.unwrap_or(self.list_page_size).max(1);
        let after = cursor.map(ListCursor::last_key);
        let name = format!("list_page({})", prefix);

        guard
            .run(async {
                let (metas, next_cursor) = match &self.pager {
                    Some(pager) => {
                        self.retry_operation(&name, || {
                            self.fetch_server_page(pager.as_ref(), prefix, cursor, page_size)
                        })
                        .await?
                    }
                    None => {
                        let metas = self
                            .retry_operation(&name, || self.fetch_page(prefix, after, page_size))
                            .await?;
                        into_page(prefix, metas, page_size, |m| m.location.as_ref())
                    }
                };

                let objects: Vec<ObjectMetadata> = if options.fetch_content_type {
                    stream::iter(metas)
                        .map(|meta| self.describe(meta))
                        .buffered(HEAD_CONCURRENCY)
                        .try_collect()
                        .await?
                } else {
                    metas.into_iter().map(|meta| to_metadata(meta, None)).collect()
                };

                info!(
                    "Listed page prefix={}, count={}, has_more={}",
                    prefix,
                    objects.len(),
                    next_cursor.is_some()
                );
                Ok(ListPage {
                    objects,
                    next_cursor,
                })
            })
            .await
    }
}

fn required<'a>(
    config: &StorageConfig,
    value: &'a Option<String>,
    field: &str,
) -> StorageResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| StorageError::config(config.storage_type_str(), format!("{} is required", field)))
}

fn content_type_of(attributes: &Attributes) -> Option<String> {
    attributes.get(&Attribute::ContentType).map(|value| {
        let value: &str = value.as_ref();
        value.to_string()
    })
}

fn to_metadata(meta: ObjectMeta, content_type: Option<String>) -> ObjectMetadata {
    ObjectMetadata {
        key: meta.location.to_string(),
        size: meta.size,
        content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        last_modified: meta.last_modified,
        version: VersionToken::from_parts(meta.e_tag, meta.version),
    }
}

/// Every part `expected` names must equal the stored one.
fn version_matches(expected: &VersionToken, current: Option<&VersionToken>) -> bool {
    let Some(current) = current else {
        return false;
    };
    if expected.e_tag.is_none() && expected.version.is_none() {
        return false;
    }
    let e_tag_ok = expected.e_tag.is_none() || expected.e_tag == current.e_tag;
    let version_ok = expected.version.is_none() || expected.version == current.version;
    e_tag_ok && version_ok
}

#[async_trait]
impl StorageProvider for ObjectStoreProvider {
    fn base_path(&self) -> &str {
        &self.base_path
    }

    fn storage_type(&self) -> StorageType {
        self.config.storage_type
    }

    fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn uri_from_key(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if self.config.storage_type == StorageType::Local {
            // file:// URIs require three slashes before an absolute path
            Url::from_directory_path(&self.base_path)
                .map(|base| format!("{}{}", base, key))
                .unwrap_or_else(|_| format!("file:///{}/{}", self.base_path.trim_start_matches('/'), key))
        } else if self.base_path.ends_with('/') {
            format!("{}{}", self.base_path, key)
        } else {
            format!("{}/{}", self.base_path, key)
        }
    }

    async fn validate_connection(&self, ctx: &CallContext) -> StorageResult<()> {
        let store = &self.store;
        measure_dur_async(
            "validate_connection",
            || {
                ctx.run(
                    "validate_connection",
                    self.retry_operation("validate_connection", move || async move {
                        store
                            .list_with_delimiter(None)
                            .await
                            .map(|_| ())
                            .map_err(StorageError::from_backend)
                    }),
                )
            },
            None,
        )
        .await
    }

    async fn upload_opts(
        &self,
        key: &str,
        source: UploadSource,
        options: UploadOptions,
        ctx: &CallContext,
    ) -> StorageResult<UploadReceipt> {
        let key = self.key(key)?;
        check_content_type(&options.content_type)?;
        if let Some(size) = source.declared_size() {
            debug!("Uploading key={}, declared_size={}", key, size);
        }

        let name = format!("upload({})", key);
        let guard = ctx.guard(name.clone());
        measure_dur_async(
            &name,
            || self.upload_guarded(&key, source, &options, &guard),
            Some(|receipt: &UploadReceipt| format!("size={}", receipt.size)),
        )
        .await
    }

    async fn download_opts(
        &self,
        key: &str,
        options: DownloadOptions,
        ctx: &CallContext,
    ) -> StorageResult<ObjectDownload> {
        let key = self.key(key)?;
        let name = format!("download({})", key);
        let guard = ctx.guard(name.clone());
        measure_dur_async(
            &name,
            || guard.run(self.open(&key, options.offset, &guard)),
            Some(|download: &ObjectDownload| format!("size={}", download.metadata().size)),
        )
        .await
    }

    async fn delete_opts(
        &self,
        key: &str,
        options: DeleteOptions,
        ctx: &CallContext,
    ) -> StorageResult<()> {
        let key = self.key(key)?;
        let name = format!("delete({})", key);
        measure_dur_async(
            &name,
            || ctx.run(&name, self.delete_guarded(&key, &options)),
            None,
        )
        .await
    }

    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&ListCursor>,
        options: &ListOptions,
        ctx: &CallContext,
    ) -> StorageResult<ListPage> {
        let guard = ctx.guard(format!("list_page({})", prefix));
        self.list_page_guarded(prefix, cursor, options, &guard)
            .await
    }

    fn list_opts<'a>(
        &'a self,
        prefix: &'a str,
        options: ListOptions,
        ctx: CallContext,
    ) -> BoxStream<'a, StorageResult<ObjectMetadata>> {
        // one deadline for the whole listing
        let guard = ctx.guard(format!("list({})", prefix));
        paginate(move |cursor: Option<ListCursor>| {
            let options = options.clone();
            let guard = guard.clone();
            async move {
                self.list_page_guarded(prefix, cursor.as_ref(), &options, &guard)
                    .await
            }
        })
    }

    async fn head(&self, key: &str, ctx: &CallContext) -> StorageResult<ObjectMetadata> {
        let key = self.key(key)?;
        let name = format!("head({})", key);
        let path = key.path();
        ctx.run(&name, self.retry_operation(&name, move || self.head_object(path)))
            .await
    }
}

impl Debug for ObjectStoreProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StorageProvider(type=object_store, backend={}, config={:?})",
            self.config.storage_type_str(),
            self.config
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::error::ErrorKind;
    use bytes::Bytes;
    use chrono::Utc;
    use object_store::list::PaginatedListResult;
    use object_store::ListResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    /// Serves listing pages from a fixed key set, one response per request.
    #[derive(Debug, Default)]
    struct CountingPager {
        keys: Vec<String>,
        requests: AtomicUsize,
        max_keys: Mutex<Vec<Option<usize>>>,
    }

    #[async_trait]
    impl PaginatedListStore for CountingPager {
        async fn list_paginated(
            &self,
            prefix: Option<&str>,
            opts: PaginatedListOptions,
        ) -> object_store::Result<PaginatedListResult> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.max_keys.lock().unwrap().push(opts.max_keys);

            let prefix = prefix.unwrap_or("");
            let matching: Vec<&String> = self.keys.iter().filter(|k| k.starts_with(prefix)).collect();
            let start: usize = opts.page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let end = (start + opts.max_keys.unwrap_or(1000)).min(matching.len());
            let objects = matching[start..end]
                .iter()
                .map(|key| ObjectMeta {
                    location: ObjectPath::from(key.as_str()),
                    last_modified: Utc::now(),
                    size: 1,
                    e_tag: None,
                    version: None,
                })
                .collect();

            Ok(PaginatedListResult {
                result: ListResult {
                    common_prefixes: vec![],
                    objects,
                },
                page_token: (end < matching.len()).then(|| end.to_string()),
            })
        }
    }

    async fn memory_provider() -> ObjectStoreProvider {
        ObjectStoreProvider::new(StorageConfig::memory()).await.unwrap()
    }

    async fn local_provider(temp_dir: &TempDir) -> ObjectStoreProvider {
        let config = StorageConfig::local(temp_dir.path().to_str().unwrap());
        ObjectStoreProvider::new(config).await.unwrap()
    }

    /// Providers that stream anything above 16 bytes in 32 byte parts.
    async fn small_multipart(config: StorageConfig) -> ObjectStoreProvider {
        let config = config
            .with_option("multipart_threshold", "16")
            .with_option("multipart_part_size", "32");
        ObjectStoreProvider::new(config).await.unwrap()
    }

    async fn put_text(provider: &ObjectStoreProvider, key: &str, text: &str) -> UploadReceipt {
        provider
            .upload(key, "text/plain", UploadSource::from(text.to_string()))
            .await
            .unwrap()
    }

    async fn read_all(provider: &ObjectStoreProvider, key: &str) -> Vec<u8> {
        provider.download(key).await.unwrap().bytes().await.unwrap().to_vec()
    }

    async fn list_keys(provider: &ObjectStoreProvider, prefix: &str, page_size: usize) -> Vec<String> {
        provider
            .list_opts(
                prefix,
                ListOptions::default().with_page_size(page_size),
                CallContext::default(),
            )
            .map_ok(|meta| meta.key)
            .try_collect()
            .await
            .unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[test]
    fn test_build_connection_options_default() {
        let config = StorageConfig::memory();
        let _options = ObjectStoreProvider::build_connection_options(&config);
        // No assertion, just make sure is does not panic
    }

    #[test]
    fn test_build_connection_options_disabled_timeout() {
        let config = StorageConfig::memory()
            .with_option("timeout", "disabled")
            .with_option("connect_timeout", "0")
            .with_option("pool_max_idle_per_host", "not_a_number");

        let _options = ObjectStoreProvider::build_connection_options(&config);
        // No assertion, just make sure is does not panic
    }

    #[test]
    fn test_build_retry_options_custom() {
        let config = StorageConfig::memory()
            .with_option("max_retries", "5")
            .with_option("retry_timeout", "300")
            .with_option("retry_initial_backoff_ms", "50")
            .with_option("retry_max_backoff_ms", "400");

        let retry_config = ObjectStoreProvider::build_retry_options(&config);
        assert_eq!(retry_config.max_retries, 5);
        assert_eq!(retry_config.retry_timeout, Duration::from_secs(300));
        assert_eq!(retry_config.backoff.init_backoff, Duration::from_millis(50));
        assert_eq!(retry_config.backoff.max_backoff, Duration::from_millis(400));
    }

    #[test]
    fn test_build_retry_options_invalid_values() {
        let config = StorageConfig::memory().with_option("retry_timeout", "not_a_number");
        let retry_config = ObjectStoreProvider::build_retry_options(&config);
        // Should fall back to defaults
        assert_eq!(retry_config.retry_timeout, RetryConfig::default().retry_timeout);
        assert_eq!(retry_config.max_retries, 10);
    }

    #[test]
    fn test_version_matches() {
        let stored = VersionToken {
            e_tag: Some("a".to_string()),
            version: Some("1".to_string()),
        };
        let by_tag = VersionToken {
            e_tag: Some("a".to_string()),
            version: None,
        };
        let stale = VersionToken {
            e_tag: Some("b".to_string()),
            version: None,
        };
        let empty = VersionToken {
            e_tag: None,
            version: None,
        };
        assert!(version_matches(&stored, Some(&stored)));
        assert!(version_matches(&by_tag, Some(&stored)));
        assert!(!version_matches(&stale, Some(&stored)));
        assert!(!version_matches(&empty, Some(&stored)));
        assert!(!version_matches(&by_tag, None));
    }

    #[tokio::test]
    async fn test_new_rejects_missing_account_key_without_network() {
        let config = StorageConfig::minio()
            .with_endpoint("minio.invalid:9000")
            .with_account_name("id")
            .with_container_name("bucket");

        match ObjectStoreProvider::new(config).await {
            Err(StorageError::ConfigError { backend, problems }) => {
                assert_eq!(backend, "minio");
                assert_eq!(problems, vec!["account_key is required".to_string()]);
            }
            other => panic!("Expected ConfigError, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_new_s3_family_providers() {
        let minio = ObjectStoreProvider::new(StorageConfig::minio_local("bucket"))
            .await
            .unwrap();
        assert_eq!(minio.base_path(), "http://localhost:9000/bucket");
        assert_eq!(
            minio.uri_from_key("a/b.txt"),
            "http://localhost:9000/bucket/a/b.txt"
        );

        let aws = ObjectStoreProvider::new(
            StorageConfig::aws()
                .with_container_name("bucket")
                .with_region("eu-west-1")
                .with_account_name("AKIDEXAMPLE")
                .with_account_key("secret"),
        )
        .await
        .unwrap();
        assert_eq!(aws.base_path(), "s3://bucket");
        assert_eq!(aws.uri_from_key("/a/b.txt"), "s3://bucket/a/b.txt");
    }

    #[tokio::test]
    async fn test_new_azure_provider() {
        let config = StorageConfig::azure()
            .with_account_name("acct")
            .with_account_key("a2V5")
            .with_service_url("https://%s.blob.core.windows.net/")
            .with_container_name("box");
        let provider = ObjectStoreProvider::new(config).await.unwrap();
        assert_eq!(provider.base_path(), "https://acct.blob.core.windows.net/box");
        assert_eq!(provider.storage_type(), StorageType::Azure);
    }

    #[tokio::test]
    async fn test_new_local_provider() {
        let temp_dir = TempDir::new().unwrap();
        let provider = local_provider(&temp_dir).await;

        let canonical_temp = temp_dir.path().canonicalize().unwrap();
        assert_eq!(provider.base_path(), canonical_temp.to_string_lossy());
        assert_eq!(provider.storage_type(), StorageType::Local);

        let uri = provider.uri_from_key("dir/file.txt");
        assert!(uri.starts_with("file:///"), "uri '{}' should start with file:///", uri);
        assert!(uri.ends_with("/dir/file.txt"));
    }

    #[tokio::test]
    async fn test_new_local_provider_invalid_path() {
        let config = StorageConfig::local("/nonexistent/invalid/path");
        match ObjectStoreProvider::new(config).await {
            Err(StorageError::ConfigError { problems, .. }) => {
                assert!(problems[0].contains("is not an existing directory"));
            }
            other => panic!("Expected ConfigError, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_validate_connection() {
        let provider = memory_provider().await;
        assert!(provider
            .validate_connection(&CallContext::default())
            .await
            .is_ok());

        let temp_dir = TempDir::new().unwrap();
        let provider = local_provider(&temp_dir).await;
        assert!(provider
            .validate_connection(&CallContext::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_round_trip_buffered_memory() {
        let provider = memory_provider().await;
        let receipt = put_text(&provider, "docs/readme.txt", "hello world").await;

        assert_eq!(receipt.key, "docs/readme.txt");
        assert_eq!(receipt.size, 11);
        assert!(receipt.version.is_some());
        assert_eq!(read_all(&provider, "docs/readme.txt").await, b"hello world");

        let meta = provider
            .head("docs/readme.txt", &CallContext::default())
            .await
            .unwrap();
        assert_eq!(meta.size, 11);
        assert_eq!(meta.content_type, "text/plain");
        assert_eq!(meta.version, receipt.version);
    }

    #[tokio::test]
    async fn test_round_trip_every_mode() {
        let temp_dir = TempDir::new().unwrap();
        let providers = vec![
            small_multipart(StorageConfig::memory()).await,
            small_multipart(StorageConfig::local(temp_dir.path().to_str().unwrap())).await,
        ];

        for provider in &providers {
            let small = payload(10);
            provider
                .upload("rt/small-reader", DEFAULT_CONTENT_TYPE, UploadSource::reader(std::io::Cursor::new(small.clone()), Some(10)))
                .await
                .unwrap();
            assert_eq!(read_all(provider, "rt/small-reader").await, small);

            let large = payload(1000);
            let receipt = provider
                .upload("rt/multipart-reader", DEFAULT_CONTENT_TYPE, UploadSource::reader(std::io::Cursor::new(large.clone()), None))
                .await
                .unwrap();
            assert_eq!(receipt.size, 1000);
            assert_eq!(read_all(provider, "rt/multipart-reader").await, large);

            let large_bytes = payload(100);
            provider
                .upload("rt/multipart-bytes", DEFAULT_CONTENT_TYPE, UploadSource::from(large_bytes.clone()))
                .await
                .unwrap();
            assert_eq!(read_all(provider, "rt/multipart-bytes").await, large_bytes);
        }
    }

    #[tokio::test]
    async fn test_upload_rejects_size_mismatch() {
        let provider = small_multipart(StorageConfig::memory()).await;
        let ctx = CallContext::default();

        // declared 10, yields 5: buffered path
        let err = provider
            .upload("bad/short", DEFAULT_CONTENT_TYPE, UploadSource::reader(&b"12345"[..], Some(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        // declared 20, yields 64: multipart path
        let err = provider
            .upload("bad/long", DEFAULT_CONTENT_TYPE, UploadSource::reader(std::io::Cursor::new(payload(64)), Some(20)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert!(!provider.exists("bad/short", &ctx).await.unwrap());
        assert!(!provider.exists("bad/long", &ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_upload_validates_key_and_content_type() {
        let provider = memory_provider().await;

        let err = provider
            .upload("/abs", "text/plain", UploadSource::from(b"x".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = provider
            .upload("ok", "not a mime", UploadSource::from(b"x".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_if_absent_keeps_existing_object() {
        let provider = memory_provider().await;
        let ctx = CallContext::default();
        put_text(&provider, "guarded.txt", "original").await;

        let err = provider
            .upload_opts(
                "guarded.txt",
                UploadSource::from("replacement".to_string()),
                UploadOptions::new("text/plain").if_absent(),
                &ctx,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert_eq!(read_all(&provider, "guarded.txt").await, b"original");

        let created = provider
            .upload_opts(
                "fresh.txt",
                UploadSource::from("new".to_string()),
                UploadOptions::new("text/plain").if_absent(),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(created.size, 3);
    }

    #[tokio::test]
    async fn test_if_match_rejects_stale_version() {
        let provider = memory_provider().await;
        let ctx = CallContext::default();
        let first = put_text(&provider, "cas.txt", "v1").await;
        let first_version = first.version.unwrap();

        let second = provider
            .upload_opts(
                "cas.txt",
                UploadSource::from("v2".to_string()),
                UploadOptions::new("text/plain").if_match(first_version.clone()),
                &ctx,
            )
            .await
            .unwrap();
        assert_ne!(second.version.as_ref(), Some(&first_version));

        let err = provider
            .upload_opts(
                "cas.txt",
                UploadSource::from("v3".to_string()),
                UploadOptions::new("text/plain").if_match(first_version),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert_eq!(read_all(&provider, "cas.txt").await, b"v2");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let providers = vec![memory_provider().await, local_provider(&temp_dir).await];

        for provider in &providers {
            assert!(provider.delete("never/existed").await.is_ok());

            put_text(provider, "to/delete.txt", "bye").await;
            provider.delete("to/delete.txt").await.unwrap();
            assert!(!provider
                .exists("to/delete.txt", &CallContext::default())
                .await
                .unwrap());
            assert!(provider.delete("to/delete.txt").await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_delete_if_match() {
        let provider = memory_provider().await;
        let ctx = CallContext::default();
        let receipt = put_text(&provider, "versioned.txt", "v1").await;
        put_text(&provider, "versioned.txt", "v2").await;

        let stale = DeleteOptions {
            if_match: receipt.version,
        };
        let err = provider
            .delete_opts("versioned.txt", stale, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        let current = provider.head("versioned.txt", &ctx).await.unwrap();
        let fresh = DeleteOptions {
            if_match: current.version,
        };
        provider
            .delete_opts("versioned.txt", fresh, &ctx)
            .await
            .unwrap();
        assert!(!provider.exists("versioned.txt", &ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_download_missing_key() {
        let provider = memory_provider().await;
        let err = provider.download("nope.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = provider
            .head("nope.txt", &CallContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_download_from_offset() {
        let provider = memory_provider().await;
        put_text(&provider, "resume.txt", "0123456789").await;

        let download = provider
            .download_opts(
                "resume.txt",
                DownloadOptions { offset: 4 },
                &CallContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(download.metadata().size, 10);
        assert_eq!(&download.bytes().await.unwrap()[..], b"456789");
    }

    #[tokio::test]
    async fn test_list_is_complete_and_ordered_across_pages() {
        let temp_dir = TempDir::new().unwrap();
        let providers = vec![memory_provider().await, local_provider(&temp_dir).await];

        for provider in &providers {
            let mut expected = Vec::new();
            for i in (0..25).rev() {
                let key = format!("p/{:03}", i);
                put_text(provider, &key, "x").await;
                expected.push(key);
            }
            expected.sort();
            put_text(provider, "o/outside", "x").await;
            put_text(provider, "q/after", "x").await;
            put_text(provider, "p-sibling", "x").await;

            assert_eq!(list_keys(provider, "p/", 4).await, expected);
            assert_eq!(list_keys(provider, "p/", 1000).await, expected);
        }
    }

    #[tokio::test]
    async fn test_list_uses_string_prefix() {
        let provider = memory_provider().await;
        for key in ["p/ab", "p/abc", "p/abd/x", "p/ac", "p/aa", "pab"] {
            put_text(&provider, key, "x").await;
        }

        assert_eq!(
            list_keys(&provider, "p/ab", 2).await,
            vec!["p/ab", "p/abc", "p/abd/x"]
        );
        assert_eq!(list_keys(&provider, "pa", 10).await, vec!["pab"]);
        assert!(list_keys(&provider, "zzz", 10).await.is_empty());
        assert_eq!(list_keys(&provider, "", 10).await.len(), 6);
    }

    #[tokio::test]
    async fn test_list_page_cursor() {
        let provider = memory_provider().await;
        let ctx = CallContext::default();
        for key in ["c/1", "c/2", "c/3"] {
            put_text(&provider, key, "x").await;
        }
        let options = ListOptions::default().with_page_size(2);

        let first = provider.list_page("c/", None, &options, &ctx).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        let cursor = first.next_cursor.unwrap();

        let second = provider
            .list_page("c/", Some(&cursor), &options, &ctx)
            .await
            .unwrap();
        assert_eq!(second.objects[0].key, "c/3");
        assert!(second.next_cursor.is_none());

        let err = provider
            .list_page("d/", Some(&cursor), &options, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_list_fetches_content_type_on_request() {
        let provider = memory_provider().await;
        provider
            .upload("ct/page.html", "text/html", UploadSource::from(b"<p/>".to_vec()))
            .await
            .unwrap();

        let plain: Vec<ObjectMetadata> = provider.list("ct/").try_collect().await.unwrap();
        assert_eq!(plain[0].content_type, DEFAULT_CONTENT_TYPE);

        let described: Vec<ObjectMetadata> = provider
            .list_opts(
                "ct/",
                ListOptions::default().with_content_type(),
                CallContext::default(),
            )
            .try_collect()
            .await
            .unwrap();
        assert_eq!(described[0].content_type, "text/html");
        assert_eq!(described[0].size, 4);
    }

    #[tokio::test]
    async fn test_cancelled_download_yields_cancelled_then_ends() {
        let provider = memory_provider().await;
        put_text(&provider, "long.txt", "stream me").await;

        let ctx = CallContext::new();
        let download = provider
            .download_opts("long.txt", DownloadOptions::default(), &ctx)
            .await
            .unwrap();
        ctx.cancel();

        let items: Vec<StorageResult<Bytes>> = download.into_stream().collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_upload_leaves_no_object() {
        let provider = small_multipart(StorageConfig::memory()).await;
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&payload(48)).await.unwrap();

        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        // the reader never reaches EOF while `client` is alive
        let err = provider
            .upload_opts(
                "stalled.bin",
                UploadSource::reader(server, None),
                UploadOptions::default(),
                &ctx,
            )
            .await
            .unwrap_err();
        drop(client);

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!provider
            .exists("stalled.bin", &CallContext::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_zero_timeout_times_out() {
        let provider = memory_provider().await;
        let ctx = CallContext::new().with_timeout(Duration::ZERO);

        let err = provider.head("any", &ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);

        let err = provider
            .upload_opts("any", UploadSource::from(b"x".to_vec()), UploadOptions::default(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(!provider.exists("any", &CallContext::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_backend_key_rules() {
        let temp_dir = TempDir::new().unwrap();
        let provider = local_provider(&temp_dir).await;

        let err = provider
            .upload("staging#", DEFAULT_CONTENT_TYPE, UploadSource::from(b"x".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        // no content type is stored on disk
        put_text(&provider, "plain.txt", "x").await;
        let meta = provider
            .head("plain.txt", &CallContext::default())
            .await
            .unwrap();
        assert_eq!(meta.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_debug_implementation() {
        let provider = ObjectStoreProvider::new(
            StorageConfig::minio_local("bucket").with_account_key("hidden-secret"),
        )
        .await
        .unwrap();

        let debug_str = format!("{:?}", provider);
        assert!(debug_str.contains("backend=minio"));
        assert!(!debug_str.contains("hidden-secret"));
    }

    #[tokio::test]
    async fn test_server_paged_listing_sends_one_request_per_page() {
        let keys = (0..25)
            .map(|i| format!("logs/{:03}", i))
            .chain(["other/x".to_string()])
            .collect();
        let pager = Arc::new(CountingPager {
            keys,
            ..Default::default()
        });
        let provider = ObjectStoreProvider {
            pager: Some(pager.clone()),
            ..memory_provider().await
        };

        let ctx = CallContext::default();
        let options = ListOptions::default().with_page_size(10);
        let first = provider.list_page("logs/", None, &options, &ctx).await.unwrap();
        assert_eq!(first.objects.len(), 10);
        assert_eq!(pager.requests.load(Ordering::SeqCst), 1);
        let cursor = first.next_cursor.unwrap();
        assert_eq!(cursor.last_key(), "logs/009");
        assert_eq!(cursor.page_token(), Some("10"));

        let second = provider
            .list_page("logs/", Some(&cursor), &options, &ctx)
            .await
            .unwrap();
        assert_eq!(second.objects[0].key, "logs/010");
        assert_eq!(pager.requests.load(Ordering::SeqCst), 2);

        let all = list_keys(&provider, "logs/", 10).await;
        assert_eq!(all.len(), 25);
        assert_eq!(all.last().map(String::as_str), Some("logs/024"));
        // 10 + 10 + 5
        assert_eq!(pager.requests.load(Ordering::SeqCst), 5);
        assert_eq!(*pager.max_keys.lock().unwrap(), vec![Some(10); 5]);
    }

    #[tokio::test]
    async fn test_download_offset_at_and_past_end() {
        let provider = memory_provider().await;
        put_text(&provider, "ten.txt", "0123456789").await;
        let ctx = CallContext::default();

        let at_end = provider
            .download_opts("ten.txt", DownloadOptions { offset: 10 }, &ctx)
            .await
            .unwrap();
        assert_eq!(at_end.metadata().size, 10);
        assert_eq!(at_end.metadata().content_type, "text/plain");
        assert!(at_end.bytes().await.unwrap().is_empty());

        let err = provider
            .download_opts("ten.txt", DownloadOptions { offset: 50 }, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("offset 50 is past the end"));

        let err = provider
            .download_opts("gone.txt", DownloadOptions { offset: 3 }, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_guarded_upload_respects_single_request_limit() {
        let config = StorageConfig::memory().with_option("max_single_put_size", "64");
        let provider = ObjectStoreProvider::new(config).await.unwrap();
        let ctx = CallContext::default();

        // refused before the reader is touched
        let (mut client, server) = tokio::io::duplex(8);
        let err = provider
            .upload_opts(
                "capped/declared",
                UploadSource::reader(server, Some(1 << 30)),
                UploadOptions::default().if_absent(),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(client.write_all(b"x").await.is_err());

        // an unsized reader is cut off past the limit
        let err = provider
            .upload_opts(
                "capped/unsized",
                UploadSource::reader(std::io::Cursor::new(payload(1000)), None),
                UploadOptions::default().if_absent(),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let receipt = provider
            .upload_opts(
                "capped/fits",
                UploadSource::reader(std::io::Cursor::new(payload(64)), None),
                UploadOptions::default().if_absent(),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(receipt.size, 64);
        assert!(!provider.exists("capped/declared", &ctx).await.unwrap());
        assert!(!provider.exists("capped/unsized", &ctx).await.unwrap());

        // without a precondition the same payload is streamed in parts
        let receipt = provider
            .upload("capped/streamed", DEFAULT_CONTENT_TYPE, UploadSource::from(payload(1000)))
            .await
            .unwrap();
        assert_eq!(receipt.size, 1000);
        assert_eq!(read_all(&provider, "capped/streamed").await, payload(1000));
    }
}
