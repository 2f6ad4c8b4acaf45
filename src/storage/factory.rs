use std::sync::Arc;

use super::config::{ConfigSource, StorageConfig};
use super::error::StorageResult;
use super::object_store::ObjectStoreProvider;
use super::provider::StorageProvider;

/// Factory for creating storage providers
pub struct StorageProviderFactory;

impl StorageProviderFactory {
    /// Create a storage provider from a configuration.
    ///
    /// The provider is bound to the one backend named by `config.storage_type`
    /// (AWS S3, Minio, Azure, GCS, a local directory or memory).
    ///
    /// # Arguments
    ///
    /// * `config` - The storage configuration specifying the provider type and options
    ///
    /// # Returns
    ///
    /// A `Result` containing:
    /// * `Ok(Arc<dyn StorageProvider>)` - A thread-safe reference to the initialized storage provider
    /// * `Err(StorageError)` - If the provider cannot be created
    ///
    /// # Errors
    ///
    /// This function will return a `ConfigError` if:
    /// * Required configuration fields are missing
    /// * The endpoint, service URL or tuning options are malformed
    /// * The storage provider cannot be initialized
    pub async fn from_config(config: StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> {
        let provider = ObjectStoreProvider::new(config).await?;
        Ok(Arc::new(provider))
    }

    /// Create a storage provider from named settings, e.g. a map loaded from a file.
    pub async fn from_source(source: &dyn ConfigSource) -> StorageResult<Arc<dyn StorageProvider>> {
        Self::from_config(StorageConfig::from_source(source)?).await
    }

    /// Create a storage provider from `STORAGE_TYPE`, `CONTAINER_NAME` and the
    /// other process environment variables.
    pub async fn from_env() -> StorageResult<Arc<dyn StorageProvider>> {
        Self::from_config(StorageConfig::from_env()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::config::{MapSource, StorageType};
    use crate::storage::error::{ErrorKind, StorageError};

    #[tokio::test]
    async fn test_from_config_memory() {
        let provider = StorageProviderFactory::from_config(StorageConfig::memory())
            .await
            .unwrap();
        assert_eq!(provider.storage_type(), StorageType::Memory);
        assert_eq!(provider.base_path(), "memory://");
    }

    #[tokio::test]
    async fn test_from_source_local() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let source: MapSource = [
            ("STORAGE_TYPE", "local"),
            ("CONTAINER_NAME", temp_dir.path().to_str().unwrap()),
        ]
        .into_iter()
        .collect();

        let provider = StorageProviderFactory::from_source(&source).await.unwrap();
        assert_eq!(provider.storage_type(), StorageType::Local);
    }

    #[tokio::test]
    async fn test_from_source_reports_every_problem() {
        let source: MapSource = [("STORAGE_TYPE", "azure"), ("ACCOUNT_NAME", "acct")]
            .into_iter()
            .collect();

        let err = StorageProviderFactory::from_source(&source).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        match err {
            StorageError::ConfigError { backend, problems } => {
                assert_eq!(backend, "azure");
                assert_eq!(problems.len(), 3);
            }
            other => panic!("Expected ConfigError, got {:?}", other),
        }
    }
}
