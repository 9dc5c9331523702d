use std::path::{Path, PathBuf};
use std::sync::Arc;

use condorpack_core::{BundlePublisher, Flavor, JobConfig, RemoteParams, RemoteWorkflow, VomsProxy};
use serde::Serialize;

use super::common;
use crate::cli::args::JobConfigArgs;
use crate::exit_codes;

#[derive(Serialize)]
struct JobOutput<'a> {
    job_num: u64,
    config: &'a JobConfig,
    bootstrap_file: PathBuf,
    output_directory: Option<PathBuf>,
    use_local_scheduler: bool,
    transfer_logs: bool,
}

/// Command line values override the settings file.
fn remote_params(
    args: &JobConfigArgs,
    base: &RemoteParams,
    env_flavor: Option<&str>,
) -> RemoteParams {
    let mut params = base.clone();
    if let Some(runtime) = &args.max_runtime {
        params.max_runtime_hours = runtime.as_secs_f64() / 3600.0;
    }
    if args.cpus.is_some() {
        params.cpus = args.cpus;
    }
    if let Some(flavor) = &args.flavor {
        params.flavor = flavor.clone();
    } else if let Some(flavor) = env_flavor {
        params.flavor = Flavor::from(flavor.to_string());
    }
    if args.getenv {
        params.getenv = true;
    }
    if let Some(group) = &args.group {
        params.accounting_group = Some(group.clone());
    }
    params
}

pub async fn run(args: JobConfigArgs, config: Option<&Path>) -> anyhow::Result<i32> {
    let session = common::load(config)?;
    let params = remote_params(
        &args,
        &session.settings.remote,
        session.env.htcondor_flavor.as_deref(),
    );

    let proxy = match &args.proxy {
        Some(path) => VomsProxy::new(path),
        None => VomsProxy::default_location(session.env.x509_user_proxy.as_deref()),
    };
    let store = common::open_store(&session.settings.store, args.store.as_deref())?;
    let publisher = BundlePublisher::new(store, session.settings.tmp_dir());

    let workflow = RemoteWorkflow::new(
        session.env.clone(),
        session.settings.clone(),
        publisher,
        Arc::new(proxy),
    )
    .with_params(params)
    .with_snapshot(common::snapshot(args.checksum.as_deref())?);

    let branches = if args.branches.is_empty() {
        vec![args.job_num]
    } else {
        args.branches.clone()
    };
    let config = workflow.job_config(args.job_num, &branches).await?;

    let output = JobOutput {
        job_num: args.job_num,
        config: &config,
        bootstrap_file: workflow.bootstrap_file()?,
        output_directory: workflow.output_directory().ok(),
        use_local_scheduler: workflow.use_local_scheduler(),
        transfer_logs: workflow.transfer_logs(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(exit_codes::EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> JobConfigArgs {
        JobConfigArgs {
            max_runtime: None,
            cpus: None,
            flavor: None,
            getenv: false,
            group: None,
            job_num: 0,
            branches: Vec::new(),
            proxy: None,
            store: None,
            checksum: None,
        }
    }

    #[test]
    fn test_flags_override_settings() {
        let mut a = args();
        a.max_runtime = Some("90m".parse().unwrap());
        a.cpus = Some(8);
        a.group = Some("group_u_CMS".into());
        let base = RemoteParams {
            cpus: Some(2),
            ..RemoteParams::default()
        };

        let params = remote_params(&a, &base, None);
        assert_eq!(params.max_runtime_hours, 1.5);
        assert_eq!(params.cpus, Some(8));
        assert_eq!(params.accounting_group.as_deref(), Some("group_u_CMS"));
    }

    #[test]
    fn test_flavor_precedence() {
        let base = RemoteParams::default();
        let params = remote_params(&args(), &base, Some("naf"));
        assert_eq!(params.flavor, Flavor::Other("naf".into()));

        let mut a = args();
        a.flavor = Some(Flavor::Cern);
        let params = remote_params(&a, &base, Some("naf"));
        assert_eq!(params.flavor, Flavor::Cern);

        let params = remote_params(&args(), &base, None);
        assert_eq!(params.flavor, Flavor::Cern);
    }
}
