//! The surface a workflow engine uses to configure HTCondor jobs.
//!
//! [`RemoteWorkflow`] composes the environment, settings, publisher,
//! credential and the repository and sandbox collaborators. The engine asks
//! it for the bundles a job needs, the submission output directory and the
//! per-job configuration.
//!
//! Bundles are fingerprinted and published once per workflow instance. Every
//! job of a submission references the same archives, even if the sources
//! change while jobs are being configured.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::bundle::PreparedBundle;
use crate::config::{AnalysisEnv, ReplicaSettings, Settings, ENV_BASE};
use crate::credential::Credential;
use crate::error::{BundleError, BundleResult};
use crate::job::{BundleRefs, JobConfig, JobEnvironmentComposer, RemoteParams};
use crate::publish::{BundlePublisher, ReplicaSet};
use crate::repo::{GitSnapshot, RepoSnapshot};
use crate::sandbox::{BashSandbox, SandboxEnv};

/// Bundles a remote job depends on. Empty in getenv mode.
#[derive(Debug, Clone, Default)]
pub struct BundleRequirements {
    pub repo: Option<PreparedBundle>,
    pub software: Option<PreparedBundle>,
    pub sandboxes: Vec<PreparedBundle>,
}

impl BundleRequirements {
    pub fn is_empty(&self) -> bool {
        self.repo.is_none() && self.software.is_none() && self.sandboxes.is_empty()
    }

    pub fn len(&self) -> usize {
        usize::from(self.repo.is_some()) + usize::from(self.software.is_some()) + self.sandboxes.len()
    }

    /// Fingerprint every bundle. Runs git, bash and tree hashing.
    fn prepare(
        env: &AnalysisEnv,
        replicas: ReplicaSettings,
        sandbox_files: &[String],
        snapshot: &dyn RepoSnapshot,
        sandbox_env: &dyn SandboxEnv,
    ) -> BundleResult<Self> {
        let repo = PreparedBundle::repo(env, snapshot, replicas.repo)?;
        let software = PreparedBundle::software(env, replicas.software)?;
        let sandboxes = sandbox_files
            .iter()
            .map(|file| PreparedBundle::sandbox(env, sandbox_env, file, replicas.sandbox))
            .collect::<BundleResult<Vec<_>>>()?;

        Ok(Self {
            repo: Some(repo),
            software: Some(software),
            sandboxes,
        })
    }
}

pub struct RemoteWorkflow {
    env: AnalysisEnv,
    settings: Settings,
    publisher: BundlePublisher,
    credential: Arc<dyn Credential>,
    snapshot: Arc<dyn RepoSnapshot>,
    sandbox_env: Arc<dyn SandboxEnv>,
    requirements: OnceCell<BundleRequirements>,
    refs: OnceCell<BundleRefs>,
}

impl RemoteWorkflow {
    pub fn new(
        env: AnalysisEnv,
        settings: Settings,
        publisher: BundlePublisher,
        credential: Arc<dyn Credential>,
    ) -> Self {
        Self {
            env,
            settings,
            publisher,
            credential,
            snapshot: Arc::new(GitSnapshot),
            sandbox_env: Arc::new(BashSandbox),
            requirements: OnceCell::new(),
            refs: OnceCell::new(),
        }
    }

    pub fn with_snapshot(mut self, snapshot: Arc<dyn RepoSnapshot>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_sandbox_env(mut self, sandbox_env: Arc<dyn SandboxEnv>) -> Self {
        self.sandbox_env = sandbox_env;
        self
    }

    pub fn with_params(mut self, params: RemoteParams) -> Self {
        self.settings.remote = params;
        self
    }

    pub fn params(&self) -> &RemoteParams {
        &self.settings.remote
    }

    /// Bundles remote jobs need, with their fingerprints computed.
    ///
    /// Computed on first use and kept for the lifetime of the workflow.
    pub async fn requirements(&self) -> BundleResult<&BundleRequirements> {
        self.requirements
            .get_or_try_init(|| async {
                if self.params().getenv {
                    return Ok(BundleRequirements::default());
                }
                let env = self.env.clone();
                let replicas = self.settings.replicas;
                let sandbox_files = self.settings.sandboxes.clone();
                let snapshot = Arc::clone(&self.snapshot);
                let sandbox_env = Arc::clone(&self.sandbox_env);
                let root = self.env.base.clone().unwrap_or_default();
                tokio::task::spawn_blocking(move || {
                    BundleRequirements::prepare(
                        &env,
                        replicas,
                        &sandbox_files,
                        snapshot.as_ref(),
                        sandbox_env.as_ref(),
                    )
                })
                .await
                .map_err(|e| BundleError::build(&root, format!("bundle preparation task failed: {e}")))?
            })
            .await
    }

    /// Published replica sets of all required bundles.
    ///
    /// The first successful publish is kept. A failed publish is retried by
    /// the next caller with the same fingerprints.
    pub async fn ensure_bundles(&self) -> BundleResult<&BundleRefs> {
        self.refs
            .get_or_try_init(|| async {
                let reqs = self.requirements().await?;
                let refs = self.publish_requirements(reqs).await?;
                let pushed: usize = refs
                    .repo
                    .iter()
                    .chain(refs.software.iter())
                    .chain(refs.sandboxes.iter())
                    .map(|set| set.pushed)
                    .sum();
                info!(bundles = reqs.len(), pushed, "bundles ready");
                Ok(refs)
            })
            .await
    }

    /// Publish all required bundles, distinct bundles concurrently.
    pub async fn publish_requirements(&self, reqs: &BundleRequirements) -> BundleResult<BundleRefs> {
        let repo = self.publish_optional(reqs.repo.as_ref());
        let software = self.publish_optional(reqs.software.as_ref());
        let sandboxes = try_join_all(reqs.sandboxes.iter().map(|b| self.publisher.publish(b)));

        let (repo, software, sandboxes) = futures::try_join!(repo, software, sandboxes)?;
        Ok(BundleRefs {
            repo,
            software,
            sandboxes,
        })
    }

    async fn publish_optional(
        &self,
        bundle: Option<&PreparedBundle>,
    ) -> BundleResult<Option<ReplicaSet>> {
        match bundle {
            Some(bundle) => self.publisher.publish(bundle).await.map(Some),
            None => Ok(None),
        }
    }

    /// Configuration of one job.
    ///
    /// Credential, parameter and environment problems are reported before
    /// anything is built or transferred.
    pub async fn job_config(&self, job_num: u64, branches: &[u64]) -> BundleResult<JobConfig> {
        self.credential.validate()?;
        let params = self.params();
        params.max_runtime_seconds()?;
        self.env.validate_remote(params.getenv)?;

        let refs = self.ensure_bundles().await?;
        debug!(job_num, ?branches, "composing job config");

        JobEnvironmentComposer::new(self.env.clone()).compose(
            params,
            refs,
            self.credential.as_ref(),
        )
    }

    /// Where submission metadata and job logs are stored.
    pub fn output_directory(&self) -> BundleResult<PathBuf> {
        self.env.require_store_local().map(|p| p.to_path_buf())
    }

    /// Script run on the worker before the job payload.
    pub fn bootstrap_file(&self) -> BundleResult<PathBuf> {
        let template = &self.params().bootstrap_file;
        let base = match self.env.base.as_ref() {
            Some(base) => base.display().to_string(),
            None if template.contains(ENV_BASE) => {
                return Err(BundleError::config(format!(
                    "bootstrap file {template} needs {ENV_BASE}"
                )))
            }
            None => String::new(),
        };
        let expanded = shellexpand::env_with_context_no_errors(template, |var| {
            (var == ENV_BASE).then(|| base.clone())
        });
        Ok(PathBuf::from(expanded.as_ref()))
    }

    /// Remote jobs talk to a scheduler of their own, never the central one.
    pub fn use_local_scheduler(&self) -> bool {
        true
    }

    pub fn transfer_logs(&self) -> bool {
        self.params().transfer_logs
    }
}
