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

use object_store::path::Path as ObjectPath;
use std::fmt::{Display, Formatter};

use super::config::StorageType;
use super::error::{StorageError, StorageResult};

const MAX_KEY_LEN: usize = 1024;
const AZURE_MAX_SEGMENTS: usize = 254;
const GCS_RESERVED_PREFIX: &str = ".well-known/acme-challenge/";

/// A key that has been checked against the rules of one backend.
///
/// Keys are `/` separated. Validation happens before any request is sent, so
/// a key the backend would reject never reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    key: String,
    path: ObjectPath,
}

impl ObjectKey {
    /// Validate `key` for `storage_type`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the violated rule.
    pub fn parse(storage_type: StorageType, key: &str) -> StorageResult<Self> {
        check_common(key)?;
        check_backend(storage_type, key)?;

        let path = ObjectPath::parse(key)
            .map_err(|e| StorageError::InvalidInput(format!("invalid key '{}': {}", key, e)))?;

        Ok(Self {
            key: key.to_string(),
            path,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub(crate) fn path(&self) -> &ObjectPath {
        &self.path
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

fn invalid(key: &str, rule: &str) -> StorageError {
    StorageError::InvalidInput(format!("invalid key '{}': {}", key.escape_debug(), rule))
}

fn check_common(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidInput("key must not be empty".to_string()));
    }
    if key.starts_with('/') {
        return Err(invalid(key, "must not start with '/'"));
    }
    if key.ends_with('/') {
        return Err(invalid(key, "must not end with '/'"));
    }
    if key.chars().any(|c| c.is_ascii_control()) {
        return Err(invalid(key, "must not contain control characters"));
    }
    for segment in key.split('/') {
        match segment {
            "" => return Err(invalid(key, "must not contain empty segments")),
            "." | ".." => return Err(invalid(key, "must not contain '.' or '..' segments")),
            _ => {}
        }
    }
    Ok(())
}

fn check_backend(storage_type: StorageType, key: &str) -> StorageResult<()> {
    match storage_type {
        StorageType::Aws | StorageType::Minio => {
            if key.len() > MAX_KEY_LEN {
                return Err(invalid(key, "must be at most 1024 bytes"));
            }
        }
        StorageType::Azure => {
            if key.chars().count() > MAX_KEY_LEN {
                return Err(invalid(key, "must be at most 1024 characters"));
            }
            if key.split('/').count() > AZURE_MAX_SEGMENTS {
                return Err(invalid(key, "must have at most 254 path segments"));
            }
        }
        StorageType::Gcs => {
            if key.len() > MAX_KEY_LEN {
                return Err(invalid(key, "must be at most 1024 bytes"));
            }
            // Control characters were rejected above; GCS forbids these two explicitly.
            if key.contains('\r') || key.contains('\n') {
                return Err(invalid(key, "must not contain carriage return or line feed"));
            }
            if key.starts_with(GCS_RESERVED_PREFIX) {
                return Err(invalid(key, "must not start with '.well-known/acme-challenge/'"));
            }
        }
        StorageType::Local => {
            if key.contains('\\') {
                return Err(invalid(key, "must not contain '\\'"));
            }
            // '#' suffixed files are the local store's in-progress uploads
            if key.split('/').any(|segment| segment.ends_with('#')) {
                return Err(invalid(key, "segments must not end with '#'"));
            }
        }
        StorageType::Memory => {}
    }
    Ok(())
}

/// Validate a listing prefix.
///
/// Prefixes are compared as plain strings, so a trailing `/` and a partial last
/// segment are both allowed. The part up to the last `/` must still form a valid
/// path, since that is the directory actually listed.
pub(crate) fn check_prefix(prefix: &str) -> StorageResult<()> {
    if prefix.starts_with('/') {
        return Err(StorageError::InvalidInput(format!(
            "invalid prefix '{}': must not start with '/'",
            prefix
        )));
    }
    if prefix.chars().any(|c| c.is_ascii_control()) {
        return Err(StorageError::InvalidInput(format!(
            "invalid prefix '{}': must not contain control characters",
            prefix.escape_debug()
        )));
    }
    Ok(())
}

/// The directory to list for a string prefix: everything before the last `/`.
pub(crate) fn prefix_parent(prefix: &str) -> StorageResult<Option<ObjectPath>> {
    match prefix.rfind('/') {
        None => Ok(None),
        Some(idx) => ObjectPath::parse(&prefix[..idx]).map(Some).map_err(|e| {
            StorageError::InvalidInput(format!("invalid prefix '{}': {}", prefix, e))
        }),
    }
}
