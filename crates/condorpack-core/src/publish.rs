//! Publishing prepared bundles to the replicated store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::human_bytes;
use crate::bundle::{BundleKind, PreparedBundle};
use crate::error::{BundleError, BundleResult};
use crate::fingerprint::Fingerprint;
use crate::store::ReplicatedBlobStore;

/// Where a published archive can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaSet {
    pub kind: BundleKind,
    /// `<base>.<fingerprint>.tgz`
    pub archive_name: String,
    /// Archive name below its kind directory, the store's view of it.
    pub logical_name: String,
    pub fingerprint: Fingerprint,
    /// Zero or negative: a single unsuffixed object.
    pub replica_count: i32,
    /// One URI per replica and public endpoint, all holding the same bytes.
    pub uris: Vec<String>,
    /// Directory URIs holding the replicas, one per public endpoint.
    pub dir_uris: Vec<String>,
    /// File-name pattern selecting a replica inside `dir_uris`.
    pub pattern: String,
    /// Number of `put` calls this publish performed.
    pub pushed: usize,
}

impl ReplicaSet {
    /// Comma-joined directory URIs as handed to remote jobs.
    pub fn joined_dir_uris(&self) -> String {
        self.dir_uris.join(",")
    }
}

/// Builds archives and pushes them to every replica location.
#[derive(Clone)]
pub struct BundlePublisher {
    store: Arc<dyn ReplicatedBlobStore>,
    tmp_dir: PathBuf,
}

impl BundlePublisher {
    pub fn new(store: Arc<dyn ReplicatedBlobStore>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            tmp_dir: tmp_dir.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReplicatedBlobStore> {
        &self.store
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Make sure every replica of `bundle` exists in the store.
    ///
    /// When all replicas are present nothing is built or pushed. Otherwise
    /// the archive is built once into a temp file, which is removed again
    /// whatever the outcome of the transfer.
    pub async fn publish(&self, bundle: &PreparedBundle) -> BundleResult<ReplicaSet> {
        let logical_name = bundle.logical_name();
        let names = bundle.replica_names();
        let missing = self.missing_replicas(&logical_name, &names).await?;

        let pushed = if missing.is_empty() {
            debug!(name = %logical_name, "all replicas present, nothing to push");
            0
        } else {
            let prepared = bundle.clone();
            let tmp_dir = self.tmp_dir.clone();
            let archive = tokio::task::spawn_blocking(move || prepared.build_archive(&tmp_dir))
                .await
                .map_err(|e| {
                    BundleError::build(
                        bundle.source().root(),
                        format!("archive task failed: {e}"),
                    )
                })??;

            let (size, unit) = human_bytes(archive.size_bytes);
            info!(
                "bundled {} archive, size is {:.2} {}",
                bundle.kind(),
                size,
                unit
            );

            self.push_all(&logical_name, archive.path(), &missing).await?
        };

        let kind_dir = bundle.kind().store_dir();
        Ok(ReplicaSet {
            kind: bundle.kind().clone(),
            archive_name: bundle.archive_name(),
            fingerprint: bundle.fingerprint().clone(),
            replica_count: bundle.replicas().count(),
            uris: names
                .iter()
                .flat_map(|name| self.store.list_uris(name))
                .collect(),
            dir_uris: self.store.list_uris(kind_dir),
            pattern: bundle.file_pattern(),
            pushed,
            logical_name,
        })
    }

    async fn missing_replicas(
        &self,
        logical_name: &str,
        names: &[String],
    ) -> BundleResult<Vec<String>> {
        let mut missing = Vec::new();
        for name in names {
            let exists = self.store.exists(name).await.map_err(|e| BundleError::Transfer {
                name: logical_name.to_string(),
                succeeded: 0,
                attempted: 0,
                message: format!("existence check for {name} failed: {e}"),
            })?;
            if !exists {
                missing.push(name.clone());
            }
        }
        Ok(missing)
    }

    /// Push `local` to each name, attempting all of them before reporting.
    async fn push_all(
        &self,
        logical_name: &str,
        local: &Path,
        names: &[String],
    ) -> BundleResult<usize> {
        let mut succeeded = 0;
        let mut failures = Vec::new();

        for name in names {
            match self.store.put(local, name).await {
                Ok(()) => succeeded += 1,
                Err(e) if e.is_already_exists() => {
                    debug!(name = %name, "replica appeared concurrently");
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "replica push failed");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if !failures.is_empty() {
            return Err(BundleError::Transfer {
                name: logical_name.to_string(),
                succeeded,
                attempted: names.len(),
                message: failures.join("; "),
            });
        }

        debug!(name = %logical_name, replicas = names.len(), "replicas pushed");
        Ok(names.len())
    }
}
