//! [`ReplicatedBlobStore`] on top of `object_store`: S3, local directories
//! (e.g. an EOS fuse mount) and memory.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, ObjectStoreExt, PutMode, PutOptions, PutPayload, WriteMultipart};
use tokio::io::AsyncReadExt;

use super::{KeyBuilder, ReplicatedBlobStore, StoreError, StoreResult, StoreSpec};

/// Archives at least this large are streamed in parts instead of read whole.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Part size of streamed uploads. S3 needs at least 5 MiB per part.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Parts uploaded concurrently while streaming.
const MAX_PARTS_IN_FLIGHT: usize = 4;

/// Replica store backed by `object_store`.
pub struct ObjectStoreReplicaStore {
    inner: Arc<dyn ObjectStore>,
    keys: KeyBuilder,
    /// Public bases the replicas are fetched from by remote jobs.
    uri_bases: Vec<String>,
    /// Size from which archives are streamed with a multipart upload.
    multipart_threshold: u64,
}

impl ObjectStoreReplicaStore {
    /// Create a store from a parsed spec.
    pub fn from_spec(spec: &StoreSpec) -> StoreResult<Self> {
        let (inner, prefix): (Arc<dyn ObjectStore>, String) = match spec.scheme.as_str() {
            "memory" => (
                Arc::new(object_store::memory::InMemory::new()),
                spec.prefix.clone(),
            ),
            "file" => {
                let path = format!("/{}", spec.prefix);
                std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
                    message: format!("failed to create store directory {}: {}", path, e),
                })?;
                let local = object_store::local::LocalFileSystem::new_with_prefix(&path)
                    .map_err(|e| StoreError::Io {
                        message: format!("failed to create local store at {}: {}", path, e),
                    })?;
                (Arc::new(local), String::new())
            }
            "s3" => {
                let bucket = spec
                    .bucket
                    .as_ref()
                    .ok_or_else(|| StoreError::InvalidSpec {
                        spec: format!("s3://{}", spec.prefix),
                        reason: "S3 URL must include bucket name".to_string(),
                    })?;

                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_allow_http(false);

                if let Some(region) = &spec.region {
                    builder = builder.with_region(region);
                }

                let s3 = builder.build().map_err(|e| StoreError::Io {
                    message: format!("failed to create S3 client: {}", e),
                })?;
                (Arc::new(s3), spec.prefix.clone())
            }
            scheme => {
                return Err(StoreError::InvalidSpec {
                    spec: spec.scheme.clone(),
                    reason: format!("unsupported scheme: {}", scheme),
                })
            }
        };

        Ok(Self {
            inner,
            keys: KeyBuilder::new(prefix),
            uri_bases: vec![spec.default_uri_base()],
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
        })
    }

    /// Create a store from a URL string.
    pub fn from_url(url: &str) -> StoreResult<Self> {
        Self::from_spec(&StoreSpec::parse(url)?)
    }

    /// Create an in-memory store for testing.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(object_store::memory::InMemory::new()),
            keys: KeyBuilder::new(""),
            uri_bases: vec!["memory://".to_string()],
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
        }
    }

    /// Replace the public URI bases. An empty list keeps the current ones.
    pub fn with_uri_bases<I, S>(mut self, bases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bases: Vec<String> = bases
            .into_iter()
            .map(|b| b.into().trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if !bases.is_empty() {
            self.uri_bases = bases;
        }
        self
    }

    pub fn with_multipart_threshold(mut self, bytes: u64) -> Self {
        self.multipart_threshold = bytes;
        self
    }

    /// Write `bytes` at `key` unless an object is already there.
    ///
    /// Backends without create-only writes get a head-then-put, which can
    /// let two racing publishers both write. Both write identical bytes.
    async fn create(
        &self,
        key: &object_store::path::Path,
        bytes: Bytes,
        name: &str,
    ) -> StoreResult<()> {
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        let payload = PutPayload::from_bytes(bytes.clone());
        match self.inner.put_opts(key, payload, opts).await {
            Ok(_) => return Ok(()),
            Err(object_store::Error::NotSupported { .. }) => {
                tracing::warn!(replica = name, "store has no create-only writes, checking first");
            }
            Err(e) => return Err(StoreError::from_object_store(e, name)),
        }

        self.ensure_absent(key, name).await?;
        self.inner
            .put(key, PutPayload::from_bytes(bytes))
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_object_store(e, name))
    }

    async fn ensure_absent(&self, key: &object_store::path::Path, name: &str) -> StoreResult<()> {
        match self.inner.head(key).await {
            Ok(_) => Err(StoreError::AlreadyExists {
                name: name.to_string(),
            }),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::from_object_store(e, name)),
        }
    }

    /// Stream `local` to `key` part by part.
    ///
    /// Multipart uploads have no create-only mode, so presence is checked
    /// first. The object only becomes visible once the upload completes.
    async fn stream(
        &self,
        key: &object_store::path::Path,
        local: &Path,
        name: &str,
    ) -> StoreResult<()> {
        self.ensure_absent(key, name).await?;

        let mut file = tokio::fs::File::open(local).await.map_err(|e| StoreError::Io {
            message: format!("failed to open {}: {}", local.display(), e),
        })?;
        let upload = self
            .inner
            .put_multipart(key)
            .await
            .map_err(|e| StoreError::from_object_store(e, name))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, PART_SIZE);

        let mut buf = vec![0u8; PART_SIZE];
        loop {
            let read = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(StoreError::Io {
                        message: format!("failed to read {}: {}", local.display(), e),
                    });
                }
            };
            if let Err(e) = writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await {
                let _ = writer.abort().await;
                return Err(StoreError::from_object_store(e, name));
            }
            writer.write(&buf[..read]);
        }

        writer
            .finish()
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_object_store(e, name))
    }
}

#[async_trait]
impl ReplicatedBlobStore for ObjectStoreReplicaStore {
    async fn put(&self, local: &Path, name: &str) -> StoreResult<()> {
        let size = tokio::fs::metadata(local)
            .await
            .map_err(|e| StoreError::Io {
                message: format!("failed to read {}: {}", local.display(), e),
            })?
            .len();
        let key = self.keys.object_key(name);
        if size >= self.multipart_threshold {
            return self.stream(&key, local, name).await;
        }

        let bytes = tokio::fs::read(local).await.map_err(|e| StoreError::Io {
            message: format!("failed to read {}: {}", local.display(), e),
        })?;
        self.create(&key, Bytes::from(bytes), name).await
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        let key = self.keys.object_key(name);
        match self.inner.head(&key).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StoreError::from_object_store(e, name)),
        }
    }

    fn list_uris(&self, name: &str) -> Vec<String> {
        let rel = KeyBuilder::new("").object_key(name);
        self.uri_bases
            .iter()
            .map(|base| format!("{}/{}", base, rel.as_ref()))
            .collect()
    }
}
