//! Bundle definitions: what is archived for each kind, under which name,
//! and with which exclusions.
//!
//! A [`PreparedBundle`] computes its fingerprint once, at construction. The
//! source is assumed not to change during a submission, so the value is
//! kept as an immutable field and reused for naming, existence checks and
//! publishing.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::{tree_checksum, ArchiveBuilder, ArchiveDescriptor, ArchiveSource, ExcludeRules};
use crate::config::AnalysisEnv;
use crate::error::{BundleError, BundleResult};
use crate::fingerprint::{sandbox_fingerprint, software_fingerprint, Fingerprint};
use crate::repo::RepoSnapshot;
use crate::sandbox::{Sandbox, SandboxEnv};
use crate::store::ReplicaLayout;

/// Default replica counts for standalone publishing.
pub const DEFAULT_REPO_REPLICAS: i32 = 5;
pub const DEFAULT_SOFTWARE_REPLICAS: i32 = 5;
pub const DEFAULT_SANDBOX_REPLICAS: i32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum BundleKind {
    Repo,
    Software,
    /// A framework sandbox, identified by its short name.
    Sandbox(String),
}

impl BundleKind {
    /// Store directory; distinct per kind so names never collide across kinds.
    pub fn store_dir(&self) -> &'static str {
        match self {
            Self::Repo => "repo",
            Self::Software => "software",
            Self::Sandbox(_) => "sandbox",
        }
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repo => f.write_str("repository"),
            Self::Software => f.write_str("software"),
            Self::Sandbox(name) => write!(f, "CMSSW sandbox {name}"),
        }
    }
}

/// A bundle with its fingerprint computed and its source pinned.
#[derive(Debug, Clone)]
pub struct PreparedBundle {
    kind: BundleKind,
    base_name: String,
    fingerprint: Fingerprint,
    source: ArchiveSource,
    builder: ArchiveBuilder,
    replicas: ReplicaLayout,
    sandbox: Option<Sandbox>,
}

impl PreparedBundle {
    /// The analysis repository at `$AP_BASE`.
    pub fn repo(
        env: &AnalysisEnv,
        snapshot: &dyn RepoSnapshot,
        replicas: i32,
    ) -> BundleResult<Self> {
        let repo = env.require_base()?;
        if !repo.is_dir() {
            return Err(BundleError::build(repo, "repository does not exist"));
        }
        let base_name = dir_name(repo)?;
        let fingerprint = snapshot.checksum(repo)?;
        let source = match snapshot.files(repo)? {
            Some(files) => ArchiveSource::Listing {
                root: repo.to_path_buf(),
                files,
            },
            None => ArchiveSource::Tree(repo.to_path_buf()),
        };

        Ok(Self {
            kind: BundleKind::Repo,
            builder: ArchiveBuilder::new(ExcludeRules::repo()).with_root(base_name.clone()),
            base_name,
            fingerprint,
            source,
            replicas: ReplicaLayout::new(replicas),
            sandbox: None,
        })
    }

    /// The software stack at `$AP_SOFTWARE`, fingerprinted by its flag files.
    pub fn software(env: &AnalysisEnv, replicas: i32) -> BundleResult<Self> {
        let software = env.require_software()?;
        let fingerprint = software_fingerprint(&env.software_flag_files)?;

        Ok(Self {
            kind: BundleKind::Software,
            base_name: "software".to_string(),
            fingerprint,
            source: ArchiveSource::Tree(software.to_path_buf()),
            builder: ArchiveBuilder::new(ExcludeRules::software()).with_root(dir_name(software)?),
            replicas: ReplicaLayout::new(replicas),
            sandbox: None,
        })
    }

    /// The framework area selected by a sandbox file.
    pub fn sandbox(
        env: &AnalysisEnv,
        sandbox_env: &dyn SandboxEnv,
        sandbox_file: &str,
        replicas: i32,
    ) -> BundleResult<Self> {
        let sandbox = Sandbox::resolve(env.require_base()?, sandbox_file, sandbox_env)?;
        let area = sandbox.cmssw_base.clone();
        if !area.is_dir() {
            return Err(BundleError::build(&area, "CMSSW area does not exist"));
        }

        let rules = ExcludeRules::sandbox();
        let src = area.join("src");
        let checksum_root = if src.is_dir() { src } else { area.clone() };
        let base_checksum = tree_checksum(&checksum_root, &rules)?;
        let fingerprint = sandbox_fingerprint(&base_checksum, &sandbox.file)?;
        let base_name = dir_name(&area)?;

        Ok(Self {
            kind: BundleKind::Sandbox(sandbox.name.clone()),
            builder: ArchiveBuilder::new(rules).with_root(base_name.clone()),
            base_name,
            fingerprint,
            source: ArchiveSource::Tree(area),
            replicas: ReplicaLayout::new(replicas),
            sandbox: Some(sandbox),
        })
    }

    /// Assemble a bundle from explicit parts.
    pub fn from_parts(
        kind: BundleKind,
        base_name: impl Into<String>,
        fingerprint: Fingerprint,
        source: ArchiveSource,
        builder: ArchiveBuilder,
        replicas: i32,
    ) -> Self {
        Self {
            kind,
            base_name: base_name.into(),
            fingerprint,
            source,
            builder,
            replicas: ReplicaLayout::new(replicas),
            sandbox: None,
        }
    }

    pub fn kind(&self) -> &BundleKind {
        &self.kind
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn source(&self) -> &ArchiveSource {
        &self.source
    }

    pub fn replicas(&self) -> ReplicaLayout {
        self.replicas
    }

    /// The resolved sandbox, for sandbox bundles.
    pub fn sandbox_info(&self) -> Option<&Sandbox> {
        self.sandbox.as_ref()
    }

    /// `<base>.<fingerprint>.tgz`
    pub fn archive_name(&self) -> String {
        format!("{}.{}.tgz", self.base_name, self.fingerprint)
    }

    /// Archive name below the kind's store directory.
    pub fn logical_name(&self) -> String {
        format!("{}/{}", self.kind.store_dir(), self.archive_name())
    }

    pub fn replica_names(&self) -> Vec<String> {
        self.replicas.replica_names(&self.logical_name())
    }

    pub fn file_pattern(&self) -> String {
        self.replicas.file_pattern(&self.archive_name())
    }

    /// Build the archive into a temp file inside `tmp_dir`.
    pub fn build_archive(&self, tmp_dir: &Path) -> BundleResult<ArchiveDescriptor> {
        self.builder.build(
            &self.source,
            tmp_dir,
            self.kind.clone(),
            self.fingerprint.clone(),
        )
    }
}

fn dir_name(path: &Path) -> BundleResult<String> {
    let canonical = path.canonicalize().unwrap_or_else(|_| PathBuf::from(path));
    canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BundleError::config(format!("{} has no directory name", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::FixedSnapshot;
    use std::collections::HashMap;

    fn env_with(vars: &[(&str, String)]) -> AnalysisEnv {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        AnalysisEnv::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_software_naming() {
        let tmp = tempfile::tempdir().unwrap();
        let software = tmp.path().join("software");
        std::fs::create_dir(&software).unwrap();
        let flag = tmp.path().join("flag");
        std::fs::write(&flag, "v1").unwrap();

        let env = env_with(&[
            ("AP_SOFTWARE", software.display().to_string()),
            ("AP_SOFTWARE_FLAG_FILES", flag.display().to_string()),
        ]);
        let bundle = PreparedBundle::software(&env, 5).unwrap();
        let fp = bundle.fingerprint().to_string();

        assert_eq!(bundle.archive_name(), format!("software.{fp}.tgz"));
        assert_eq!(bundle.logical_name(), format!("software/software.{fp}.tgz"));
        assert_eq!(bundle.replica_names().len(), 5);
        assert_eq!(bundle.file_pattern(), format!("software.{fp}.{{0..4}}.tgz"));
    }

    #[test]
    fn test_software_requires_env() {
        let err = PreparedBundle::software(&AnalysisEnv::default(), 5).unwrap_err();
        assert!(matches!(err, BundleError::Config { .. }));
    }

    #[test]
    fn test_repo_uses_snapshot_checksum() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("analysis");
        std::fs::create_dir(&repo).unwrap();
        let env = env_with(&[("AP_BASE", repo.display().to_string())]);

        let snapshot = FixedSnapshot::new(Fingerprint::from_checksum("c0ffee").unwrap());
        let bundle = PreparedBundle::repo(&env, &snapshot, 3).unwrap();
        assert_eq!(bundle.archive_name(), "analysis.c0ffee.tgz");
        assert_eq!(bundle.logical_name(), "repo/analysis.c0ffee.tgz");
        assert_eq!(bundle.source(), &ArchiveSource::Tree(repo));
    }

    #[test]
    fn test_kinds_never_share_names() {
        let fp = Fingerprint::from_checksum("same").unwrap();
        let make = |kind: BundleKind| {
            PreparedBundle::from_parts(
                kind,
                "software",
                fp.clone(),
                ArchiveSource::Tree(PathBuf::from("/x")),
                ArchiveBuilder::default(),
                1,
            )
            .logical_name()
        };
        let repo = make(BundleKind::Repo);
        let software = make(BundleKind::Software);
        let sandbox = make(BundleKind::Sandbox("software".into()));
        assert_ne!(repo, software);
        assert_ne!(software, sandbox);
        assert_ne!(repo, sandbox);
    }

    struct AreaFromFile;

    impl SandboxEnv for AreaFromFile {
        fn variable(&self, sandbox_file: &Path, _name: &str) -> BundleResult<Option<String>> {
            Ok(std::fs::read_to_string(sandbox_file)
                .ok()
                .map(|c| c.trim().to_string()))
        }
    }

    #[test]
    fn test_sandbox_bundle_keeps_resolved_sandbox() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("analysis");
        let area = tmp.path().join("CMSSW_10_6_30");
        std::fs::create_dir_all(base.join("sandboxes")).unwrap();
        std::fs::create_dir_all(area.join("src/Analysis")).unwrap();
        std::fs::write(area.join("src/Analysis/BuildFile.xml"), "<xml/>").unwrap();
        std::fs::write(
            base.join("sandboxes/cmssw_default.sh"),
            area.display().to_string(),
        )
        .unwrap();
        let env = env_with(&[("AP_BASE", base.display().to_string())]);

        let bundle = PreparedBundle::sandbox(&env, &AreaFromFile, "cmssw_default.sh", 2).unwrap();
        let sandbox = bundle.sandbox_info().unwrap();
        assert_eq!(sandbox.name, "cmssw_default");
        assert_eq!(bundle.kind(), &BundleKind::Sandbox("cmssw_default".into()));
        assert!(bundle.archive_name().starts_with("CMSSW_10_6_30."));
        assert!(bundle.logical_name().starts_with("sandbox/"));

        let software = PreparedBundle::from_parts(
            BundleKind::Software,
            "software",
            Fingerprint::from_checksum("abc").unwrap(),
            ArchiveSource::Tree(PathBuf::from("/x")),
            ArchiveBuilder::default(),
            1,
        );
        assert!(software.sandbox_info().is_none());
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&BundleKind::Sandbox("cmssw_default".into())).unwrap();
        assert_eq!(json, r#"{"kind":"sandbox","name":"cmssw_default"}"#);
        assert_eq!(
            serde_json::to_string(&BundleKind::Software).unwrap(),
            r#"{"kind":"software"}"#
        );
    }
}
