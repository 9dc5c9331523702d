//! Content-addressed, replicated job bundles for HTCondor workflows.
//!
//! The analysis repository, its software stack and any CMSSW sandboxes are
//! packed into deterministic archives named after a content fingerprint,
//! pushed to a replicated store, and referenced from the per-job
//! configuration so remote workers can rebuild the environment.

pub mod archive;
pub mod bundle;
pub mod config;
pub mod credential;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod publish;
pub mod repo;
pub mod sandbox;
pub mod store;
pub mod workflow;

// Convenience re-exports
pub use archive::{ArchiveBuilder, ArchiveDescriptor, ArchiveSource, ExcludeRules};
pub use bundle::{BundleKind, PreparedBundle};
pub use config::{AnalysisEnv, Settings};
pub use credential::{Credential, StaticCredential, VomsProxy};
pub use error::{BundleError, BundleResult};
pub use fingerprint::Fingerprint;
pub use job::{BundleRefs, Flavor, JobConfig, JobEnvironmentComposer, RemoteParams};
pub use publish::{BundlePublisher, ReplicaSet};
pub use repo::{FixedSnapshot, GitSnapshot, RepoSnapshot};
pub use sandbox::{BashSandbox, Sandbox, SandboxEnv};
pub use store::{ObjectStoreReplicaStore, ReplicatedBlobStore, StoreError, StoreSpec};
pub use workflow::{BundleRequirements, RemoteWorkflow};
