//! Shared setup: environment, settings, bundle preparation and the store.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use condorpack_core::bundle::{
    DEFAULT_REPO_REPLICAS, DEFAULT_SANDBOX_REPLICAS, DEFAULT_SOFTWARE_REPLICAS,
};
use condorpack_core::config::StoreSettings;
use condorpack_core::repo::{FixedSnapshot, GitSnapshot, RepoSnapshot};
use condorpack_core::{
    AnalysisEnv, BashSandbox, BundleError, Fingerprint, ObjectStoreReplicaStore, PreparedBundle,
    Settings,
};

use crate::cli::args::{KindArg, TargetArgs};

pub(crate) struct Session {
    pub env: AnalysisEnv,
    pub settings: Settings,
}

pub(crate) fn load(config: Option<&Path>) -> anyhow::Result<Session> {
    let cwd = std::env::current_dir().context("failed to read working directory")?;
    let settings = Settings::discover(config, &cwd)?;
    Ok(Session {
        env: AnalysisEnv::from_env(),
        settings,
    })
}

pub(crate) fn snapshot(checksum: Option<&str>) -> anyhow::Result<Arc<dyn RepoSnapshot>> {
    let snapshot: Arc<dyn RepoSnapshot> = match checksum {
        Some(checksum) => Arc::new(FixedSnapshot::new(Fingerprint::from_checksum(checksum)?)),
        None => Arc::new(GitSnapshot),
    };
    Ok(snapshot)
}

pub(crate) fn default_replicas(kind: KindArg) -> i32 {
    match kind {
        KindArg::Repo => DEFAULT_REPO_REPLICAS,
        KindArg::Software => DEFAULT_SOFTWARE_REPLICAS,
        KindArg::Sandbox => DEFAULT_SANDBOX_REPLICAS,
    }
}

/// Prepare the bundle selected on the command line.
///
/// Fingerprinting runs git and bash, so it happens on a blocking thread.
pub(crate) async fn prepare(
    target: &TargetArgs,
    env: &AnalysisEnv,
    replicas: i32,
) -> anyhow::Result<PreparedBundle> {
    let target = target.clone();
    let env = env.clone();
    let bundle = tokio::task::spawn_blocking(move || prepare_blocking(&target, &env, replicas))
        .await
        .context("bundle preparation task failed")??;
    Ok(bundle)
}

pub(crate) fn prepare_blocking(
    target: &TargetArgs,
    env: &AnalysisEnv,
    replicas: i32,
) -> anyhow::Result<PreparedBundle> {
    let bundle = match target.kind {
        KindArg::Repo => {
            let snapshot = snapshot(target.checksum.as_deref())?;
            PreparedBundle::repo(env, snapshot.as_ref(), replicas)?
        }
        KindArg::Software => PreparedBundle::software(env, replicas)?,
        KindArg::Sandbox => {
            let file = target
                .sandbox_file
                .as_deref()
                .ok_or_else(|| BundleError::config("--sandbox-file is required for sandboxes"))?;
            PreparedBundle::sandbox(env, &BashSandbox, file, replicas)?
        }
    };
    Ok(bundle)
}

pub(crate) fn open_store(
    settings: &StoreSettings,
    url: Option<&str>,
) -> anyhow::Result<Arc<ObjectStoreReplicaStore>> {
    let url = url.unwrap_or(&settings.url);
    let store = ObjectStoreReplicaStore::from_url(url)
        .map_err(|e| BundleError::config(format!("cannot open store {url}: {e}")))?
        .with_uri_bases(settings.uris.iter().cloned());
    Ok(Arc::new(store))
}
