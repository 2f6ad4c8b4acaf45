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

//! # Blobstore
//!
//! A Rust library for storing and retrieving blobs through one interface,
//! whatever the backend.
//!
//! Blobstore binds to a single container on Amazon S3, an S3-compatible store
//! such as Minio, Azure Blob Storage, Google Cloud Storage, a local directory,
//! or memory, and exposes upload, download, delete, list and metadata
//! operations that behave the same on all of them.
//!
//! ## Features
//!
//! - **Backends**: AWS S3, Minio, Azure Blob Storage, Google Cloud Storage, local filesystem, memory
//! - **Atomic uploads**: single request for small payloads, multipart for large or unsized ones
//! - **Conditional writes**: create-if-absent and compare-and-swap on the object version
//! - **Resumable downloads**: streamed bodies resume after transient failures
//! - **Paged listing**: string prefixes, lexicographic order, resumable cursors
//! - **Cancellation and timeouts**: per call, through [`CallContext`]
//!
//! ## Quick Start
//!
//! ### Local Filesystem Example
//!
//! ```rust,no_run
//! use blobstore::{StorageConfig, StorageProviderFactory, UploadSource};
//! use futures::TryStreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let provider = StorageProviderFactory::from_config(StorageConfig::local("./data")).await?;
//!
//! provider
//!     .upload("reports/2025.txt", "text/plain", UploadSource::from("hello".to_string()))
//!     .await?;
//!
//! let body = provider.download("reports/2025.txt").await?.bytes().await?;
//! assert_eq!(&body[..], b"hello");
//!
//! let listed: Vec<_> = provider.list("reports/").try_collect().await?;
//! println!("{} objects", listed.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### AWS S3 Example
//!
//! ```rust,no_run
//! use blobstore::{StorageConfig, StorageProviderFactory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let config = StorageConfig::aws()
//!     .with_container_name("my-bucket")
//!     .with_region("us-east-1")
//!     .with_account_name("ACCESS_KEY")
//!     .with_account_key("SECRET_KEY");
//!
//! let provider = StorageProviderFactory::from_config(config).await?;
//! provider.validate_connection(&Default::default()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Environment Example
//!
//! ```rust,no_run
//! use blobstore::StorageProviderFactory;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! // STORAGE_TYPE=azure ACCOUNT_NAME=... ACCOUNT_KEY=...
//! // ACCOUNT_SERVICE_URL=https://%s.blob.core.windows.net CONTAINER_NAME=...
//! let provider = StorageProviderFactory::from_env().await?;
//! println!("{:?}", provider);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`storage`] - Configuration, providers and the transfer types
//! - [`util`] - Retry and timing helpers

pub mod storage;
pub mod util;

// Re-export commonly used types
pub use storage::{
    CallContext, ConfigResolver, ErrorKind, ListCursor, ListOptions, ListPage, ObjectDownload,
    ObjectKey, ObjectMetadata, StorageConfig, StorageError, StorageProvider,
    StorageProviderFactory, StorageResult, StorageType, UploadOptions, UploadSource,
};
