//! HTCondor job configuration: custom submit directives plus the render
//! variables substituted into every file shipped with a job.
//!
//! Two mutually exclusive modes exist. In getenv mode the worker inherits
//! the submitting environment and only a few passthrough variables are
//! rendered. In bundle mode the worker rebuilds the environment from the
//! published repository, software and sandbox archives.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bundle::BundleKind;
use crate::config::{
    require, AnalysisEnv, ENV_LCG_DIR, ENV_LOCAL_SCHEDULER, ENV_STORE_NAME, ENV_USER,
};
use crate::credential::Credential;
use crate::error::{BundleError, BundleResult};
use crate::publish::ReplicaSet;

/// Accounting group placeholder meaning "not set".
pub const NO_STR: &str = "NO_STR";

pub const DEFAULT_BOOTSTRAP_FILE: &str = "$AP_BASE/ap/tasks/base/remote_bootstrap.sh";

pub const BOOTSTRAP_GETENV: &str = "htcondor_getenv";
pub const BOOTSTRAP_STANDALONE: &str = "htcondor_standalone";

/// Batch system configuration name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Flavor {
    #[default]
    Cern,
    Other(String),
}

impl Flavor {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Cern => "cern",
            Self::Other(name) => name,
        }
    }

    /// Platform requirement for this flavor, if any.
    fn requirements(&self) -> Option<&'static str> {
        match self {
            Self::Cern => Some(r#"(OpSysAndVer =?= "CentOS7")"#),
            Self::Other(_) => None,
        }
    }
}

impl From<String> for Flavor {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "cern" => Self::Cern,
            _ => Self::Other(value.trim().to_string()),
        }
    }
}

impl From<Flavor> for String {
    fn from(value: Flavor) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for Flavor {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-submission parameters of remote jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteParams {
    pub max_runtime_hours: f64,
    /// `None` leaves the CPU count to the cluster default.
    pub cpus: Option<u32>,
    pub flavor: Flavor,
    /// Copy the submitting environment instead of shipping bundles.
    pub getenv: bool,
    pub accounting_group: Option<String>,
    pub transfer_logs: bool,
    pub bootstrap_file: String,
    /// Helper script shipped with each job.
    pub wlcg_tools: Option<PathBuf>,
}

impl Default for RemoteParams {
    fn default() -> Self {
        Self {
            max_runtime_hours: 2.0,
            cpus: None,
            flavor: Flavor::Cern,
            getenv: false,
            accounting_group: None,
            transfer_logs: true,
            bootstrap_file: DEFAULT_BOOTSTRAP_FILE.to_string(),
            wlcg_tools: None,
        }
    }
}

impl RemoteParams {
    pub fn max_runtime_seconds(&self) -> BundleResult<i64> {
        max_runtime_seconds(self.max_runtime_hours)
    }

    fn accounting_group(&self) -> Option<&str> {
        self.accounting_group
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty() && *g != NO_STR)
    }
}

/// `floor(hours * 3600) - 1`, so the job ends before the slot limit.
pub fn max_runtime_seconds(hours: f64) -> BundleResult<i64> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(BundleError::config(format!(
            "max runtime must be a positive number of hours, got {hours}"
        )));
    }
    let seconds = (hours * 3600.0).floor() as i64 - 1;
    if seconds < 1 {
        return Err(BundleError::config(format!(
            "max runtime of {hours}h is shorter than two seconds"
        )));
    }
    Ok(seconds)
}

/// Published bundles referenced by a job in bundle mode.
#[derive(Debug, Clone, Default)]
pub struct BundleRefs {
    pub repo: Option<ReplicaSet>,
    pub software: Option<ReplicaSet>,
    pub sandboxes: Vec<ReplicaSet>,
}

/// Everything the workflow engine needs to submit one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobConfig {
    /// Custom submit-file directives, in emission order.
    pub custom_content: Vec<(String, String)>,
    pub render_variables: BTreeMap<String, String>,
    pub input_files: Vec<PathBuf>,
}

impl JobConfig {
    pub fn directive(&self, key: &str) -> Option<&str> {
        self.custom_content
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn variable(&self, key: &str) -> Option<&str> {
        self.render_variables.get(key).map(String::as_str)
    }

    fn push_directive(&mut self, key: &str, value: impl ToString) {
        self.custom_content.push((key.to_string(), value.to_string()));
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        self.render_variables.insert(key.to_string(), value.into());
    }
}

/// Turns remote parameters and published bundles into a [`JobConfig`].
#[derive(Debug, Clone)]
pub struct JobEnvironmentComposer {
    env: AnalysisEnv,
}

impl JobEnvironmentComposer {
    pub fn new(env: AnalysisEnv) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &AnalysisEnv {
        &self.env
    }

    /// Compose the configuration of one job.
    ///
    /// The credential is validated before anything else; a job is never
    /// configured with an expired credential.
    pub fn compose(
        &self,
        params: &RemoteParams,
        bundles: &BundleRefs,
        credential: &dyn Credential,
    ) -> BundleResult<JobConfig> {
        credential.validate()?;

        let mut config = JobConfig::default();

        let proxy = credential.path();
        let proxy_name = proxy
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BundleError::credential(proxy, "credential path has no file name"))?;
        config.input_files.push(proxy.to_path_buf());
        config.set("ap_proxy_file", proxy_name);
        if let Some(tools) = &params.wlcg_tools {
            config.input_files.push(tools.clone());
        }

        if let Some(requirements) = params.flavor.requirements() {
            config.push_directive("requirements", requirements);
        }
        if params.getenv {
            config.push_directive("getenv", "true");
        }
        config.push_directive("log", "/dev/null");
        config.push_directive("+MaxRuntime", params.max_runtime_seconds()?);
        if let Some(cpus) = params.cpus.filter(|c| *c > 0) {
            config.push_directive("RequestCpus", cpus);
        }
        if let Some(group) = params.accounting_group() {
            config.push_directive("+AccountingGroup", group);
        }

        if params.getenv {
            self.passthrough_variables(&mut config)?;
        } else {
            bundle_variables(&mut config, bundles)?;
        }
        self.common_variables(&mut config, &params.flavor)?;

        Ok(config)
    }

    fn passthrough_variables(&self, config: &mut JobConfig) -> BundleResult<()> {
        config.set("ap_bootstrap_name", BOOTSTRAP_GETENV);
        config.set("ap_env_path", require(self.env.path.as_deref(), "PATH")?);
        config.set(
            "ap_env_pythonpath",
            self.env.pythonpath.clone().unwrap_or_default(),
        );
        config.set(
            "ap_env_ld_library_path",
            self.env.ld_library_path.clone().unwrap_or_default(),
        );
        Ok(())
    }

    fn common_variables(&self, config: &mut JobConfig, flavor: &Flavor) -> BundleResult<()> {
        let base = self.env.require_base()?.display().to_string();
        config.set("ap_htcondor_flavor", flavor.as_str());
        config.set("ap_lcg_dir", require(self.env.lcg_dir.as_deref(), ENV_LCG_DIR)?);
        config.set("ap_base", base);
        config.set("ap_user", require(self.env.user.as_deref(), ENV_USER)?);
        config.set(
            "ap_store_name",
            require(self.env.store_name.as_deref(), ENV_STORE_NAME)?,
        );
        config.set(
            "ap_local_scheduler",
            require(self.env.local_scheduler.as_deref(), ENV_LOCAL_SCHEDULER)?,
        );
        Ok(())
    }
}

fn bundle_variables(config: &mut JobConfig, bundles: &BundleRefs) -> BundleResult<()> {
    config.set("ap_bootstrap_name", BOOTSTRAP_STANDALONE);

    let software = bundles
        .software
        .as_ref()
        .ok_or_else(|| BundleError::config("bundle mode requires a software bundle"))?;
    config.set("ap_software_uris", software.joined_dir_uris());
    config.set("ap_software_pattern", software.pattern.clone());

    let repo = bundles
        .repo
        .as_ref()
        .ok_or_else(|| BundleError::config("bundle mode requires a repository bundle"))?;
    config.set("ap_repo_uris", repo.joined_dir_uris());
    config.set("ap_repo_pattern", repo.pattern.clone());

    let mut uris = Vec::with_capacity(bundles.sandboxes.len());
    let mut patterns = Vec::with_capacity(bundles.sandboxes.len());
    let mut names = Vec::with_capacity(bundles.sandboxes.len());
    for sandbox in &bundles.sandboxes {
        let BundleKind::Sandbox(name) = &sandbox.kind else {
            return Err(BundleError::config(format!(
                "{} is not a sandbox bundle",
                sandbox.logical_name
            )));
        };
        uris.push(sandbox.joined_dir_uris());
        patterns.push(sandbox.pattern.clone());
        names.push(name.clone());
    }
    config.set("ap_cmssw_sandbox_uris", bash_array(&uris));
    config.set("ap_cmssw_sandbox_patterns", bash_array(&patterns));
    config.set("ap_cmssw_sandbox_names", bash_array(&names));
    Ok(())
}

/// Render values as a bash array literal, `()` when empty.
pub fn bash_array(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| format!("\"{i}\"")).collect();
    format!("({})", quoted.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_runtime_seconds() {
        assert_eq!(max_runtime_seconds(2.0).unwrap(), 7199);
        assert_eq!(max_runtime_seconds(0.5).unwrap(), 1799);
        assert_eq!(max_runtime_seconds(1.0001).unwrap(), 3599);
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, 0.0001] {
            assert!(matches!(
                max_runtime_seconds(bad),
                Err(BundleError::Config { .. })
            ));
        }
    }

    #[test]
    fn test_flavor_parse() {
        assert_eq!("cern".parse::<Flavor>().unwrap(), Flavor::Cern);
        assert_eq!("CERN".parse::<Flavor>().unwrap(), Flavor::Cern);
        assert_eq!(
            "naf".parse::<Flavor>().unwrap(),
            Flavor::Other("naf".to_string())
        );
        assert!(Flavor::Other("naf".into()).requirements().is_none());
        assert_eq!(Flavor::Cern.to_string(), "cern");
    }

    #[test]
    fn test_accounting_group_sentinels() {
        let mut params = RemoteParams::default();
        assert_eq!(params.accounting_group(), None);
        params.accounting_group = Some(NO_STR.to_string());
        assert_eq!(params.accounting_group(), None);
        params.accounting_group = Some(" ".to_string());
        assert_eq!(params.accounting_group(), None);
        params.accounting_group = Some("group_u_CMS.u_zh".to_string());
        assert_eq!(params.accounting_group(), Some("group_u_CMS.u_zh"));
    }

    #[test]
    fn test_bash_array() {
        assert_eq!(bash_array(&[]), "()");
        assert_eq!(
            bash_array(&["a".to_string(), "b c".to_string()]),
            r#"("a" "b c")"#
        );
    }

    #[test]
    fn test_remote_params_yaml_defaults() {
        let params: RemoteParams = serde_yaml::from_str("getenv: true\n").unwrap();
        assert!(params.getenv);
        assert_eq!(params.max_runtime_hours, 2.0);
        assert!(params.transfer_logs);
        assert_eq!(params.bootstrap_file, DEFAULT_BOOTSTRAP_FILE);
    }
}
