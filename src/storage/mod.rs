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

//! Blob storage abstraction layer
//!
//! This module provides one interface over Amazon S3, S3-compatible stores
//! such as Minio, Azure Blob Storage, Google Cloud Storage, a local directory
//! and an in-memory store.
//!
//! A [`StorageConfig`] names the backend and its credentials, the
//! [`ConfigResolver`] checks it, and the [`StorageProviderFactory`] turns it
//! into a [`StorageProvider`] backed by the `object_store` crate.

pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod key;
pub mod listing;
pub mod object_store;
pub mod provider;
pub mod resolver;
pub mod transfer;

// Public exports
pub use config::{ConfigSource, EnvSource, ListConsistency, MapSource, StorageConfig, StorageType};
pub use context::CallContext;
pub use error::{ErrorKind, StorageError, StorageResult};
pub use factory::StorageProviderFactory;
pub use key::ObjectKey;
pub use listing::{ListCursor, ListOptions, ListPage};
pub use provider::{
    DeleteOptions, DownloadOptions, ObjectMetadata, StorageProvider, UploadOptions,
    UploadPrecondition, UploadReceipt, VersionToken, DEFAULT_CONTENT_TYPE,
};
pub use resolver::ConfigResolver;
pub use transfer::{ObjectDownload, UploadSource};
