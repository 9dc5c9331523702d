use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use condorpack_core::Flavor;

#[derive(Parser)]
#[command(
    name = "condorpack",
    version,
    about = "Content-addressed, replicated job bundles for HTCondor workflows"
)]
pub struct Cli {
    /// Settings file (default: ./condorpack.yaml when present)
    #[arg(long, global = true, env = "CONDORPACK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the content fingerprint of a bundle
    Fingerprint(TargetArgs),
    /// Build a bundle archive locally without uploading it
    Archive(ArchiveArgs),
    /// Publish a bundle to all replica locations
    Publish(PublishArgs),
    /// Compose the configuration of a remote job
    JobConfig(JobConfigArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    Repo,
    Software,
    Sandbox,
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Bundle kind
    #[arg(value_enum)]
    pub kind: KindArg,

    /// Sandbox file; relative names resolve against $AP_BASE/sandboxes
    #[arg(long, required_if_eq("kind", "sandbox"))]
    pub sandbox_file: Option<String>,

    /// Repository checksum from an external tool instead of git
    #[arg(long)]
    pub checksum: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Output archive path
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Number of replicas; zero or less stores one unsuffixed object
    /// (default: 5 for repo and software, 10 for sandboxes)
    #[arg(long, allow_negative_numbers = true)]
    pub replicas: Option<i32>,

    /// Store URL, overrides the settings file
    #[arg(long)]
    pub store: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct JobConfigArgs {
    /// Maximum runtime, e.g. 2h or 90m
    #[arg(long)]
    pub max_runtime: Option<humantime::Duration>,

    /// CPUs to request; unset leaves the cluster default
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Batch system flavor (default: $AP_HTCONDOR_FLAVOR, then settings)
    #[arg(long)]
    pub flavor: Option<Flavor>,

    /// Copy the submitting environment instead of shipping bundles
    #[arg(long)]
    pub getenv: bool,

    /// Accounting group
    #[arg(long)]
    pub group: Option<String>,

    /// Job number, used for logging
    #[arg(long, default_value_t = 0)]
    pub job_num: u64,

    /// Branches handled by the job
    #[arg(long, value_delimiter = ',')]
    pub branches: Vec<u64>,

    /// Proxy file (default: $X509_USER_PROXY, then /tmp/x509up_u<uid>)
    #[arg(long)]
    pub proxy: Option<PathBuf>,

    /// Store URL, overrides the settings file
    #[arg(long)]
    pub store: Option<String>,

    /// Repository checksum from an external tool instead of git
    #[arg(long)]
    pub checksum: Option<String>,
}
