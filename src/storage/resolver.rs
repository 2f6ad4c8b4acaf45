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

use std::path::Path;
use url::Url;

use super::config::{StorageConfig, StorageType, TUNING_OPTIONS};
use super::error::{StorageError, StorageResult};

/// Smallest non-final part S3 and GCS accept in a multipart upload.
pub(crate) const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Placeholders accepted in an Azure service URL template.
const ACCOUNT_PLACEHOLDERS: [&str; 2] = ["%s", "{account}"];

/// Checks a [`StorageConfig`] before any transport is built.
///
/// Validation never touches the network. Every problem found is reported in a
/// single `ConfigError`, so a misconfigured deployment can be fixed in one pass.
pub struct ConfigResolver;

impl ConfigResolver {
    /// Validate `config` for its backend.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError { backend, problems }` listing every missing field,
    /// malformed URL and unparsable tuning option.
    pub fn validate(config: &StorageConfig) -> StorageResult<()> {
        let problems = Self::problems(config);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(StorageError::ConfigError {
                backend: config.storage_type_str().to_string(),
                problems,
            })
        }
    }

    /// Collect every problem with `config`, in field order.
    pub fn problems(config: &StorageConfig) -> Vec<String> {
        let mut problems = Vec::new();

        for field in Self::required_fields(config.storage_type) {
            if Self::field(config, field).is_none() {
                problems.push(format!("{} is required", field));
            }
        }

        match config.storage_type {
            StorageType::Aws | StorageType::Minio => {
                if let Some(endpoint) = non_empty(&config.endpoint) {
                    Self::check_endpoint(endpoint, config.ssl, &mut problems);
                }
            }
            StorageType::Azure => {
                if let (Some(template), Some(account)) =
                    (non_empty(&config.service_url), non_empty(&config.account_name))
                {
                    Self::check_service_url(template, account, config.ssl, &mut problems);
                }
            }
            StorageType::Gcs => {}
            StorageType::Local => {
                if let Some(dir) = non_empty(&config.container_name) {
                    if !Path::new(dir).is_dir() {
                        problems.push(format!(
                            "container_name '{}' is not an existing directory",
                            dir
                        ));
                    }
                }
            }
            StorageType::Memory => {}
        }

        Self::check_options(config, &mut problems);
        problems
    }

    /// Fields that must be set for each backend.
    pub fn required_fields(storage_type: StorageType) -> &'static [&'static str] {
        match storage_type {
            StorageType::Aws => &["container_name", "region", "account_name", "account_key"],
            StorageType::Minio => &["endpoint", "account_name", "account_key", "container_name"],
            StorageType::Azure => &[
                "account_name",
                "account_key",
                "service_url",
                "container_name",
            ],
            StorageType::Gcs => &["container_name", "account_key"],
            StorageType::Local => &["container_name"],
            StorageType::Memory => &[],
        }
    }

    fn field<'a>(config: &'a StorageConfig, name: &str) -> Option<&'a str> {
        let value = match name {
            "account_name" => &config.account_name,
            "account_key" => &config.account_key,
            "account_secret" => &config.account_secret,
            "service_url" => &config.service_url,
            "container_name" => &config.container_name,
            "endpoint" => &config.endpoint,
            "region" => &config.region,
            _ => return None,
        };
        non_empty(value)
    }

    fn check_endpoint(endpoint: &str, ssl: bool, problems: &mut Vec<String>) {
        if ssl && endpoint.trim().to_lowercase().starts_with("http://") {
            problems.push(format!(
                "endpoint '{}' uses http:// but ssl is enabled",
                endpoint
            ));
            return;
        }
        if Url::parse(&endpoint_url(endpoint, ssl)).is_err() {
            problems.push(format!("endpoint '{}' is not a valid URL", endpoint));
        }
    }

    fn check_service_url(template: &str, account: &str, ssl: bool, problems: &mut Vec<String>) {
        if !ACCOUNT_PLACEHOLDERS.iter().any(|p| template.contains(p)) {
            problems.push(format!(
                "service_url '{}' must contain '%s' or '{{account}}'",
                template
            ));
            return;
        }
        let url = service_url(template, account);
        match Url::parse(&url) {
            Err(_) => problems.push(format!("service_url '{}' is not a valid URL", template)),
            Ok(parsed) if ssl && parsed.scheme() == "http" => problems.push(format!(
                "service_url '{}' uses http:// but ssl is enabled",
                template
            )),
            Ok(_) => {}
        }
    }

    fn check_options(config: &StorageConfig, problems: &mut Vec<String>) {
        for key in TUNING_OPTIONS {
            let Some(value) = config.options.get(*key) else {
                continue;
            };
            let value = value.trim();
            let disableable = matches!(*key, "timeout" | "connect_timeout");
            if disableable && value == "disabled" {
                continue;
            }
            match value.parse::<u64>() {
                Err(_) => problems.push(format!(
                    "option {} must be a non-negative integer, got '{}'",
                    key, value
                )),
                Ok(0) if matches!(
                    *key,
                    "list_page_size"
                        | "multipart_part_size"
                        | "multipart_concurrency"
                        | "max_single_put_size"
                ) =>
                {
                    problems.push(format!("option {} must be greater than zero", key))
                }
                Ok(_) => {}
            }
        }

        if matches!(
            config.storage_type,
            StorageType::Aws | StorageType::Minio | StorageType::Gcs
        ) {
            Self::check_part_sizes(config, problems);
        }
    }

    /// Part bounds for stores that reject small multipart parts at completion.
    fn check_part_sizes(config: &StorageConfig, problems: &mut Vec<String>) {
        let parse = |key: &str| {
            config
                .options
                .get(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
        };
        let part_size = parse("multipart_part_size");
        if let Some(part_size) = part_size.filter(|size| (1..MIN_PART_SIZE).contains(size)) {
            problems.push(format!(
                "option multipart_part_size must be at least {} bytes for {}, got {}",
                MIN_PART_SIZE,
                config.storage_type_str(),
                part_size
            ));
        }
        if let (Some(threshold), Some(part_size)) = (parse("multipart_threshold"), part_size) {
            if threshold < part_size {
                problems.push(format!(
                    "option multipart_threshold ({}) must not be smaller than multipart_part_size ({})",
                    threshold, part_size
                ));
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Full endpoint URL: a bare `host:port` gets `https://` or `http://` from `ssl`.
pub(crate) fn endpoint_url(endpoint: &str, ssl: bool) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if ssl {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    }
}

/// Expand an Azure service URL template for `account`.
pub(crate) fn service_url(template: &str, account: &str) -> String {
    ACCOUNT_PLACEHOLDERS
        .iter()
        .fold(template.trim().to_string(), |url, placeholder| {
            url.replace(placeholder, account)
        })
        .trim_end_matches('/')
        .to_string()
}
