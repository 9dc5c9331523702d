//! Job configuration composition.

use std::path::{Path, PathBuf};

use condorpack_core::bundle::BundleKind;
use condorpack_core::config::AnalysisEnv;
use condorpack_core::credential::{Credential, StaticCredential};
use condorpack_core::error::{BundleError, BundleResult};
use condorpack_core::fingerprint::Fingerprint;
use condorpack_core::job::{BundleRefs, Flavor, JobEnvironmentComposer, RemoteParams};
use condorpack_core::publish::ReplicaSet;

fn env() -> AnalysisEnv {
    AnalysisEnv {
        base: Some(PathBuf::from("/home/ap/analysis")),
        software: Some(PathBuf::from("/home/ap/software")),
        lcg_dir: Some("/cvmfs/sft.cern.ch/lcg/views/LCG_99/x86_64-centos7-gcc8-opt".into()),
        user: Some("ap".into()),
        store_name: Some("ap_store".into()),
        local_scheduler: Some("True".into()),
        path: Some("/usr/local/bin:/usr/bin".into()),
        pythonpath: Some("/home/ap/analysis".into()),
        ..AnalysisEnv::default()
    }
}

fn replica_set(kind: BundleKind, base: &str, dir: &str) -> ReplicaSet {
    let fingerprint = Fingerprint::from_checksum("abc123").unwrap();
    let archive_name = format!("{base}.{fingerprint}.tgz");
    ReplicaSet {
        logical_name: format!("{dir}/{archive_name}"),
        archive_name,
        kind,
        fingerprint,
        replica_count: 3,
        uris: Vec::new(),
        dir_uris: vec![
            format!("root://eosuser.cern.ch//eos/user/a/ap/{dir}"),
            format!("gsiftp://eosuserftp.cern.ch/eos/user/a/ap/{dir}"),
        ],
        pattern: format!("{base}.abc123.{{0..2}}.tgz"),
        pushed: 0,
    }
}

fn refs(sandboxes: &[&str]) -> BundleRefs {
    BundleRefs {
        repo: Some(replica_set(BundleKind::Repo, "analysis", "repo")),
        software: Some(replica_set(BundleKind::Software, "software", "software")),
        sandboxes: sandboxes
            .iter()
            .map(|name| replica_set(BundleKind::Sandbox(name.to_string()), "CMSSW_10_6_30", "sandbox"))
            .collect(),
    }
}

fn proxy() -> StaticCredential {
    StaticCredential::valid("/tmp/x509up_u1000")
}

fn compose(params: &RemoteParams, bundles: &BundleRefs) -> BundleResult<condorpack_core::JobConfig> {
    JobEnvironmentComposer::new(env()).compose(params, bundles, &proxy())
}

#[test]
fn test_default_directives() {
    let config = compose(&RemoteParams::default(), &refs(&[])).unwrap();

    let keys: Vec<&str> = config.custom_content.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["requirements", "log", "+MaxRuntime"]);
    assert_eq!(config.directive("requirements"), Some(r#"(OpSysAndVer =?= "CentOS7")"#));
    assert_eq!(config.directive("log"), Some("/dev/null"));
    assert_eq!(config.directive("+MaxRuntime"), Some("7199"));
    assert_eq!(config.directive("RequestCpus"), None);
    assert_eq!(config.directive("+AccountingGroup"), None);
}

#[test]
fn test_cpus_and_group() {
    let params = RemoteParams {
        cpus: Some(4),
        accounting_group: Some("group_u_CMST3.all".into()),
        ..RemoteParams::default()
    };
    let config = compose(&params, &refs(&[])).unwrap();
    assert_eq!(config.directive("RequestCpus"), Some("4"));
    assert_eq!(config.directive("+AccountingGroup"), Some("group_u_CMST3.all"));

    let params = RemoteParams {
        cpus: Some(0),
        accounting_group: Some("NO_STR".into()),
        ..RemoteParams::default()
    };
    let config = compose(&params, &refs(&[])).unwrap();
    assert_eq!(config.directive("RequestCpus"), None);
    assert_eq!(config.directive("+AccountingGroup"), None);
}

#[test]
fn test_unknown_flavor_has_no_requirements() {
    let params = RemoteParams {
        flavor: Flavor::Other("naf".into()),
        ..RemoteParams::default()
    };
    let config = compose(&params, &refs(&[])).unwrap();
    assert_eq!(config.directive("requirements"), None);
    assert_eq!(config.variable("ap_htcondor_flavor"), Some("naf"));
}

#[test]
fn test_invalid_runtime_is_config_error() {
    let params = RemoteParams {
        max_runtime_hours: 0.0,
        ..RemoteParams::default()
    };
    let err = compose(&params, &refs(&[])).unwrap_err();
    assert!(matches!(err, BundleError::Config { .. }));
}

#[test]
fn test_bundle_mode_variables() {
    let config = compose(&RemoteParams::default(), &refs(&[])).unwrap();

    assert_eq!(config.variable("ap_bootstrap_name"), Some("htcondor_standalone"));
    assert_eq!(
        config.variable("ap_software_uris"),
        Some("root://eosuser.cern.ch//eos/user/a/ap/software,gsiftp://eosuserftp.cern.ch/eos/user/a/ap/software")
    );
    assert_eq!(
        config.variable("ap_software_pattern"),
        Some("software.abc123.{0..2}.tgz")
    );
    assert_eq!(
        config.variable("ap_repo_pattern"),
        Some("analysis.abc123.{0..2}.tgz")
    );
    assert_eq!(config.variable("ap_cmssw_sandbox_uris"), Some("()"));
    assert_eq!(config.variable("ap_cmssw_sandbox_patterns"), Some("()"));
    assert_eq!(config.variable("ap_cmssw_sandbox_names"), Some("()"));
    assert_eq!(config.directive("getenv"), None);

    for key in config.render_variables.keys() {
        assert!(!key.starts_with("ap_env_"), "passthrough variable {key} in bundle mode");
    }
}

#[test]
fn test_getenv_mode_variables() {
    let params = RemoteParams {
        getenv: true,
        ..RemoteParams::default()
    };
    let config = compose(&params, &BundleRefs::default()).unwrap();

    assert_eq!(config.directive("getenv"), Some("true"));
    assert_eq!(config.variable("ap_bootstrap_name"), Some("htcondor_getenv"));
    assert_eq!(config.variable("ap_env_path"), Some("/usr/local/bin:/usr/bin"));
    assert_eq!(config.variable("ap_env_pythonpath"), Some("/home/ap/analysis"));
    assert_eq!(config.variable("ap_env_ld_library_path"), Some(""));

    for key in config.render_variables.keys() {
        assert!(
            !key.ends_with("_uris") && !key.ends_with("_pattern") && !key.ends_with("_patterns"),
            "bundle variable {key} in getenv mode"
        );
    }
}

#[test]
fn test_sandbox_arrays_aligned() {
    let config = compose(&RemoteParams::default(), &refs(&["cmssw_default", "cmssw_nano"])).unwrap();

    assert_eq!(
        config.variable("ap_cmssw_sandbox_names"),
        Some(r#"("cmssw_default" "cmssw_nano")"#)
    );
    let patterns = config.variable("ap_cmssw_sandbox_patterns").unwrap();
    assert_eq!(
        patterns,
        r#"("CMSSW_10_6_30.abc123.{0..2}.tgz" "CMSSW_10_6_30.abc123.{0..2}.tgz")"#
    );
    let uris = config.variable("ap_cmssw_sandbox_uris").unwrap();
    assert_eq!(uris.matches("\" \"").count(), 1);
    assert!(uris.starts_with("(\"root://") && uris.ends_with("\")"));
}

#[test]
fn test_bundle_mode_requires_bundles() {
    let err = compose(&RemoteParams::default(), &BundleRefs::default()).unwrap_err();
    assert!(matches!(err, BundleError::Config { .. }));
}

#[test]
fn test_common_variables_and_inputs() {
    let params = RemoteParams {
        wlcg_tools: Some(PathBuf::from("/opt/law/contrib/wlcg/scripts/law_wlcg_tools.sh")),
        ..RemoteParams::default()
    };
    let config = compose(&params, &refs(&[])).unwrap();

    assert_eq!(config.variable("ap_proxy_file"), Some("x509up_u1000"));
    assert_eq!(
        config.input_files,
        vec![
            PathBuf::from("/tmp/x509up_u1000"),
            PathBuf::from("/opt/law/contrib/wlcg/scripts/law_wlcg_tools.sh"),
        ]
    );
    assert_eq!(config.variable("ap_htcondor_flavor"), Some("cern"));
    assert_eq!(config.variable("ap_base"), Some("/home/ap/analysis"));
    assert_eq!(config.variable("ap_user"), Some("ap"));
    assert_eq!(config.variable("ap_store_name"), Some("ap_store"));
    assert_eq!(config.variable("ap_local_scheduler"), Some("True"));
    assert!(config.variable("ap_lcg_dir").unwrap().starts_with("/cvmfs/"));
}

#[test]
fn test_missing_common_variable() {
    let mut env = env();
    env.user = None;
    let err = JobEnvironmentComposer::new(env)
        .compose(&RemoteParams::default(), &refs(&[]), &proxy())
        .unwrap_err();
    assert!(err.to_string().contains("AP_USER"));
}

/// Credential that records whether it was consulted.
struct Expired(std::sync::atomic::AtomicBool);

impl Credential for Expired {
    fn path(&self) -> &Path {
        Path::new("/tmp/x509up_u1000")
    }

    fn validate(&self) -> BundleResult<()> {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        Err(BundleError::credential(self.path(), "expired"))
    }
}

#[test]
fn test_expired_credential_aborts_first() {
    let credential = Expired(std::sync::atomic::AtomicBool::new(false));
    // even with an otherwise invalid request the credential error wins
    let params = RemoteParams {
        max_runtime_hours: -1.0,
        ..RemoteParams::default()
    };
    let err = JobEnvironmentComposer::new(AnalysisEnv::default())
        .compose(&params, &BundleRefs::default(), &credential)
        .unwrap_err();
    assert!(err.is_credential_invalid());
    assert!(credential.0.load(std::sync::atomic::Ordering::SeqCst));
}
