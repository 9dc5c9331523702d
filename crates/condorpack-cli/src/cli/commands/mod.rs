use super::args::*;

pub(crate) mod archive;
pub(crate) mod common;
pub(crate) mod fingerprint;
pub(crate) mod job;
pub(crate) mod publish;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config.as_deref();
    match cli.cmd {
        Command::Fingerprint(args) => fingerprint::run(args, config),
        Command::Archive(args) => archive::run(args, config).await,
        Command::Publish(args) => publish::run(args, config).await,
        Command::JobConfig(args) => job::run(args, config).await,
    }
}
