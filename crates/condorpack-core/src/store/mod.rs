//! Replicated archive storage.
//!
//! The core only decides names and fan-out; moving bytes is the job of a
//! [`ReplicatedBlobStore`]. Stores are write-once: objects are
//! content-addressed, so an existing object already holds the right bytes
//! and is never replaced or deleted.

pub mod error;
pub mod naming;
pub mod object_store_backend;

use std::path::Path;

use async_trait::async_trait;

pub use error::{StoreError, StoreResult};
pub use naming::{KeyBuilder, ReplicaLayout};
pub use object_store_backend::ObjectStoreReplicaStore;

/// Parsed store specification from CLI/config.
///
/// # Examples
///
/// ```text
/// s3://analysis-bundles/software?region=eu-west-1
/// file:///eos/user/a/ap/bundles
/// memory://  (for testing)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    /// The scheme (s3, file, memory)
    pub scheme: String,
    /// Bucket name (empty for file://)
    pub bucket: Option<String>,
    /// Base prefix/path within the bucket
    pub prefix: String,
    /// Optional region (for S3)
    pub region: Option<String>,
}

impl StoreSpec {
    /// Parse a store URL like `s3://bucket/prefix` or `file:///path`.
    pub fn parse(url: &str) -> StoreResult<Self> {
        let parsed = url::Url::parse(url).map_err(|e| StoreError::InvalidSpec {
            spec: url.to_string(),
            reason: e.to_string(),
        })?;

        let region = parsed
            .query_pairs()
            .find(|(k, _)| k == "region")
            .map(|(_, v)| v.to_string());

        Ok(Self {
            scheme: parsed.scheme().to_string(),
            bucket: parsed
                .host_str()
                .filter(|h| !h.is_empty())
                .map(|s| s.to_string()),
            prefix: parsed.path().trim_matches('/').to_string(),
            region,
        })
    }

    pub fn is_memory(&self) -> bool {
        self.scheme == "memory"
    }

    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }

    /// URI under which objects of this store are addressed by default.
    pub fn default_uri_base(&self) -> String {
        match (self.scheme.as_str(), &self.bucket) {
            ("file", _) => format!("file:///{}", self.prefix),
            (scheme, Some(bucket)) if self.prefix.is_empty() => format!("{scheme}://{bucket}"),
            (scheme, Some(bucket)) => format!("{scheme}://{bucket}/{}", self.prefix),
            (scheme, None) => format!("{scheme}:///{}", self.prefix),
        }
    }
}

/// Storage holding the replicas of published archives.
#[async_trait]
pub trait ReplicatedBlobStore: Send + Sync {
    /// Upload `local` under `name`. Uses a conditional write.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if uploaded successfully
    /// - `Err(StoreError::AlreadyExists)` if the object exists (same bytes)
    /// - `Err(StoreError::...)` for other errors
    async fn put(&self, local: &Path, name: &str) -> StoreResult<()>;

    /// Check if an object exists.
    async fn exists(&self, name: &str) -> StoreResult<bool>;

    /// URIs remote jobs can fetch `name` from, one per public endpoint,
    /// in a stable order.
    fn list_uris(&self, name: &str) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_spec() {
        let spec = StoreSpec::parse("s3://ap-bundles/software").unwrap();
        assert_eq!(spec.scheme, "s3");
        assert_eq!(spec.bucket, Some("ap-bundles".to_string()));
        assert_eq!(spec.prefix, "software");
        assert_eq!(spec.default_uri_base(), "s3://ap-bundles/software");
    }

    #[test]
    fn test_parse_s3_with_region() {
        let spec = StoreSpec::parse("s3://ap-bundles/prefix?region=eu-west-1").unwrap();
        assert_eq!(spec.region, Some("eu-west-1".to_string()));
    }

    #[test]
    fn test_parse_file_spec() {
        let spec = StoreSpec::parse("file:///tmp/condorpack-store").unwrap();
        assert!(spec.is_file());
        assert!(spec.bucket.is_none());
        assert_eq!(spec.prefix, "tmp/condorpack-store");
        assert_eq!(spec.default_uri_base(), "file:///tmp/condorpack-store");
    }

    #[test]
    fn test_parse_memory_spec() {
        let spec = StoreSpec::parse("memory://").unwrap();
        assert!(spec.is_memory());
    }

    #[test]
    fn test_parse_invalid_spec() {
        assert!(matches!(
            StoreSpec::parse("not a url"),
            Err(StoreError::InvalidSpec { .. })
        ));
    }
}
