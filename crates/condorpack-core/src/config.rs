//! Explicit configuration for bundling and job composition.
//!
//! Two sources feed the core:
//!
//! - [`AnalysisEnv`]: values owned by the analysis setup (install paths,
//!   flag files, user and store names). Read from the process environment
//!   only through [`AnalysisEnv::from_env`]; everything else receives the
//!   struct.
//! - [`Settings`]: an optional YAML file with store, remote-job and replica
//!   settings.
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `AP_BASE` | Analysis repository checkout |
//! | `AP_SOFTWARE` | Software install directory |
//! | `AP_SOFTWARE_FLAG_FILES` | Whitespace-separated flag files fingerprinting the software stack |
//! | `AP_LCG_DIR` | LCG view used by remote jobs |
//! | `AP_USER` | User name forwarded to remote jobs |
//! | `AP_STORE_NAME` | Store name forwarded to remote jobs |
//! | `AP_STORE_LOCAL` | Local store, holds submission metadata |
//! | `AP_LOCAL_SCHEDULER` | Whether remote jobs use a local scheduler |
//! | `AP_HTCONDOR_FLAVOR` | Default batch flavor |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, BundleResult};
use crate::job::RemoteParams;

/// Default settings file looked up in the working directory.
pub const SETTINGS_FILE_NAME: &str = "condorpack.yaml";

pub const ENV_BASE: &str = "AP_BASE";
pub const ENV_SOFTWARE: &str = "AP_SOFTWARE";
pub const ENV_SOFTWARE_FLAG_FILES: &str = "AP_SOFTWARE_FLAG_FILES";
pub const ENV_LCG_DIR: &str = "AP_LCG_DIR";
pub const ENV_USER: &str = "AP_USER";
pub const ENV_STORE_NAME: &str = "AP_STORE_NAME";
pub const ENV_STORE_LOCAL: &str = "AP_STORE_LOCAL";
pub const ENV_LOCAL_SCHEDULER: &str = "AP_LOCAL_SCHEDULER";
pub const ENV_HTCONDOR_FLAVOR: &str = "AP_HTCONDOR_FLAVOR";

/// Values taken from the analysis environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisEnv {
    pub base: Option<PathBuf>,
    pub software: Option<PathBuf>,
    pub software_flag_files: Vec<PathBuf>,
    pub lcg_dir: Option<String>,
    pub user: Option<String>,
    pub store_name: Option<String>,
    pub store_local: Option<PathBuf>,
    pub local_scheduler: Option<String>,
    pub htcondor_flavor: Option<String>,
    pub path: Option<String>,
    pub pythonpath: Option<String>,
    pub ld_library_path: Option<String>,
    pub x509_user_proxy: Option<PathBuf>,
}

impl AnalysisEnv {
    /// Read all values from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            base: get(ENV_BASE).map(PathBuf::from),
            software: get(ENV_SOFTWARE).map(PathBuf::from),
            software_flag_files: get(ENV_SOFTWARE_FLAG_FILES)
                .map(|v| v.split_whitespace().map(PathBuf::from).collect())
                .unwrap_or_default(),
            lcg_dir: get(ENV_LCG_DIR),
            user: get(ENV_USER),
            store_name: get(ENV_STORE_NAME),
            store_local: get(ENV_STORE_LOCAL).map(PathBuf::from),
            local_scheduler: get(ENV_LOCAL_SCHEDULER),
            htcondor_flavor: get(ENV_HTCONDOR_FLAVOR),
            path: get("PATH"),
            pythonpath: get("PYTHONPATH"),
            ld_library_path: get("LD_LIBRARY_PATH"),
            x509_user_proxy: get("X509_USER_PROXY").map(PathBuf::from),
        }
    }

    pub fn require_base(&self) -> BundleResult<&Path> {
        require(self.base.as_deref(), ENV_BASE)
    }

    pub fn require_software(&self) -> BundleResult<&Path> {
        require(self.software.as_deref(), ENV_SOFTWARE)
    }

    pub fn require_store_local(&self) -> BundleResult<&Path> {
        require(self.store_local.as_deref(), ENV_STORE_LOCAL)
    }

    /// Check the variables forwarded to every remote job.
    ///
    /// Called before any publish so a missing value never costs a transfer.
    pub fn validate_remote(&self, getenv: bool) -> BundleResult<()> {
        self.require_base()?;
        require(self.lcg_dir.as_deref(), ENV_LCG_DIR)?;
        require(self.user.as_deref(), ENV_USER)?;
        require(self.store_name.as_deref(), ENV_STORE_NAME)?;
        require(self.local_scheduler.as_deref(), ENV_LOCAL_SCHEDULER)?;
        if getenv {
            require(self.path.as_deref(), "PATH")?;
        } else {
            self.require_software()?;
        }
        Ok(())
    }
}

pub(crate) fn require<'a, T: ?Sized>(value: Option<&'a T>, var: &str) -> BundleResult<&'a T> {
    value.ok_or_else(|| BundleError::config(format!("environment variable {var} is not set")))
}

/// Store location and the public URI bases replicas are fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Store URL (`memory://`, `file:///path`, `s3://bucket/prefix?region=..`).
    pub url: String,
    /// Base URIs remote jobs fetch from. Empty means the store URL itself.
    pub uris: Vec<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "file:///tmp/condorpack-store".to_string(),
            uris: Vec::new(),
        }
    }
}

/// Replica counts used when a workflow requires bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicaSettings {
    pub repo: i32,
    pub software: i32,
    pub sandbox: i32,
}

impl Default for ReplicaSettings {
    fn default() -> Self {
        Self {
            repo: 3,
            software: 3,
            sandbox: 3,
        }
    }
}

/// Contents of `condorpack.yaml`.
///
/// ```yaml
/// store:
///   url: s3://analysis-bundles/software?region=eu-west-1
///   uris: [root://eosuser.cern.ch//eos/user/a/ap/software]
/// remote:
///   max_runtime_hours: 4
///   cpus: 2
///   flavor: cern
/// replicas: { repo: 3, software: 3, sandbox: 5 }
/// sandboxes: [cmssw_default.sh]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub store: StoreSettings,
    pub remote: RemoteParams,
    pub replicas: ReplicaSettings,
    /// Sandbox files to bundle for remote jobs, relative to `$AP_BASE/sandboxes`.
    pub sandboxes: Vec<String>,
    /// Directory for transient archives. Defaults to the system temp dir.
    pub tmp_dir: Option<PathBuf>,
}

impl Settings {
    pub fn from_yaml(content: &str) -> BundleResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| BundleError::config(format!("invalid settings: {e}")))
    }

    pub fn load(path: &Path) -> BundleResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BundleError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Load an explicit file, or `condorpack.yaml` in `dir` when present.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> BundleResult<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let candidate = dir.join(SETTINGS_FILE_NAME);
                if candidate.is_file() {
                    Self::load(&candidate)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
