// Copyright 2022 Adobe. All rights reserved.
// This file is licensed to you under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License. You may obtain a copy
// of the License at http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under
// the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR REPRESENTATIONS
// OF ANY KIND, either express or implied. See the License for the specific language
// governing permissions and limitations under the License.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter, Result as FmtResult};

use super::config::{StorageConfig, StorageType};
use super::context::CallContext;
use super::error::{StorageError, StorageResult};
use super::listing::{ListCursor, ListOptions, ListPage};
use super::transfer::{ObjectDownload, UploadSource};

/// Content type reported when the backend has none recorded.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Backend-assigned version of an object, used for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken {
    pub e_tag: Option<String>,
    pub version: Option<String>,
}

impl VersionToken {
    pub(crate) fn from_parts(e_tag: Option<String>, version: Option<String>) -> Option<Self> {
        if e_tag.is_none() && version.is_none() {
            None
        } else {
            Some(Self { e_tag, version })
        }
    }
}

/// Metadata about an object in storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object key, relative to the container
    pub key: String,

    /// Object size in bytes
    pub size: u64,

    /// MIME type, `application/octet-stream` when the backend has none
    pub content_type: String,

    pub last_modified: DateTime<Utc>,

    /// Version token, when the backend assigns one
    pub version: Option<VersionToken>,
}

/// Write guard for an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UploadPrecondition {
    /// Replace whatever is stored under the key.
    #[default]
    Overwrite,
    /// Create only; fail if the key exists.
    IfAbsent,
    /// Replace only if the stored object still has this version.
    IfMatch(VersionToken),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    pub precondition: UploadPrecondition,
}

impl UploadOptions {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            precondition: UploadPrecondition::Overwrite,
        }
    }

    pub fn if_absent(mut self) -> Self {
        self.precondition = UploadPrecondition::IfAbsent;
        self
    }

    pub fn if_match(mut self, version: VersionToken) -> Self {
        self.precondition = UploadPrecondition::IfMatch(version);
        self
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENT_TYPE)
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub size: u64,
    pub version: Option<VersionToken>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Byte offset to start from, for resuming a partial download.
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete only if the stored object has this version.
    pub if_match: Option<VersionToken>,
}

/// Unified interface over blob storage backends
///
/// One implementation serves Amazon S3, Azure Blob Storage, Google Cloud
/// Storage, S3-compatible stores such as Minio, a local directory, and an
/// in-memory store. Which one is used is decided by the [`StorageConfig`] the
/// provider was built from; nothing in the method signatures is backend specific.
///
/// Every operation validates its key before contacting the backend and maps
/// backend failures into [`StorageError`]. The `_opts` variants take a
/// [`CallContext`] for cancellation and timeouts.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the base URI of the bound container.
    ///
    /// # Returns
    ///
    /// A string slice such as `s3://bucket`, `gs://bucket`,
    /// `https://account.blob.core.windows.net/container` or a local directory.
    fn base_path(&self) -> &str;

    fn storage_type(&self) -> StorageType;

    /// The configuration this provider was built from.
    fn config(&self) -> &StorageConfig;

    /// Get a full provider-specific URI for a key.
    ///
    /// # Arguments
    ///
    /// * `key` - The object key
    ///
    /// # Returns
    ///
    /// A String containing the full URI (e.g., "s3://bucket/key", "file:///dir/key").
    fn uri_from_key(&self, key: &str) -> String;

    /// Validate the connection to the storage backend.
    ///
    /// This performs a single listing round trip to ensure credentials,
    /// connectivity and the container all work.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * Credentials are invalid or expired (`Unauthorized`)
    /// * The container does not exist (`NotFound`)
    /// * Network errors occur (`TransportError`)
    async fn validate_connection(&self, ctx: &CallContext) -> StorageResult<()>;

    /// Store an object.
    ///
    /// Small payloads of known size are sent in one request. Payloads of
    /// unknown or large size are streamed as a multipart upload that becomes
    /// visible only once complete and is aborted on failure or cancellation.
    /// Either way readers see the old object or the new one, never a mix.
    ///
    /// # Arguments
    ///
    /// * `key` - Destination key
    /// * `source` - The bytes to store
    /// * `options` - Content type and write precondition
    /// * `ctx` - Cancellation and timeout
    ///
    /// # Returns
    ///
    /// An [`UploadReceipt`] with the stored size and the version assigned by the backend.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The key or content type is invalid, or a reader yields a different
    ///   number of bytes than declared (`InvalidInput`)
    /// * The precondition does not hold (`PreconditionFailed`)
    /// * The call is cancelled or times out (`Cancelled`, `TimedOut`)
    /// * Permission denied or network errors occur
    async fn upload_opts(
        &self,
        key: &str,
        source: UploadSource,
        options: UploadOptions,
        ctx: &CallContext,
    ) -> StorageResult<UploadReceipt>;

    /// Open an object for reading.
    ///
    /// The returned handle streams the body. A transient failure mid-body is
    /// resumed with a range request pinned to the original version.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The key does not exist (`NotFound`)
    /// * The call is cancelled or times out
    /// * Network or storage access errors occur
    async fn download_opts(
        &self,
        key: &str,
        options: DownloadOptions,
        ctx: &CallContext,
    ) -> StorageResult<ObjectDownload>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete_opts(
        &self,
        key: &str,
        options: DeleteOptions,
        ctx: &CallContext,
    ) -> StorageResult<()>;

    /// Fetch one page of objects whose keys start with `prefix`.
    ///
    /// Pass `None` for the first page and the returned `next_cursor` for the
    /// following ones. Keys come back in lexicographic order.
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// * The cursor was issued for a different prefix (`InvalidInput`)
    /// * Network or storage access errors occur
    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&ListCursor>,
        options: &ListOptions,
        ctx: &CallContext,
    ) -> StorageResult<ListPage>;

    /// Lazily list every object whose key starts with `prefix`.
    ///
    /// Pages are fetched as the stream is polled. A failed page ends the stream
    /// with that error.
    fn list_opts<'a>(
        &'a self,
        prefix: &'a str,
        options: ListOptions,
        ctx: CallContext,
    ) -> BoxStream<'a, StorageResult<ObjectMetadata>>;

    /// Get metadata for one object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key does not exist.
    async fn head(&self, key: &str, ctx: &CallContext) -> StorageResult<ObjectMetadata>;

    /// Check if an object exists.
    ///
    /// # Returns
    ///
    /// A `Result` containing:
    /// * `Ok(true)` - The object exists
    /// * `Ok(false)` - The object does not exist
    /// * `Err(StorageError)` - If the check fails for any other reason
    async fn exists(&self, key: &str, ctx: &CallContext) -> StorageResult<bool> {
        match self.head(key, ctx).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store `source` under `key`, replacing any existing object.
    async fn upload(
        &self,
        key: &str,
        content_type: &str,
        source: UploadSource,
    ) -> StorageResult<UploadReceipt> {
        self.upload_opts(
            key,
            source,
            UploadOptions::new(content_type),
            &CallContext::default(),
        )
        .await
    }

    async fn download(&self, key: &str) -> StorageResult<ObjectDownload> {
        self.download_opts(key, DownloadOptions::default(), &CallContext::default())
            .await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.delete_opts(key, DeleteOptions::default(), &CallContext::default())
            .await
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, StorageResult<ObjectMetadata>> {
        self.list_opts(prefix, ListOptions::default(), CallContext::default())
    }
}

impl Debug for dyn StorageProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "StorageProvider(type={}, base_path={})",
            self.storage_type(),
            self.base_path()
        )
    }
}

/// Check that `content_type` looks like `type/subtype`.
pub(crate) fn check_content_type(content_type: &str) -> StorageResult<()> {
    let invalid = || {
        StorageError::InvalidInput(format!(
            "invalid content type '{}': expected type/subtype",
            content_type.escape_debug()
        ))
    };

    if content_type.chars().any(|c| c.is_control()) {
        return Err(invalid());
    }
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((kind, subtype))
            if !kind.is_empty()
                && !subtype.is_empty()
                && !subtype.contains('/')
                && !essence.contains(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(invalid()),
    }
}
