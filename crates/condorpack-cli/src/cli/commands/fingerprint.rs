use std::path::Path;

use super::common;
use crate::cli::args::TargetArgs;
use crate::exit_codes;

pub fn run(args: TargetArgs, config: Option<&Path>) -> anyhow::Result<i32> {
    let session = common::load(config)?;
    let bundle =
        common::prepare_blocking(&args, &session.env, common::default_replicas(args.kind))?;

    println!("{}", bundle.fingerprint());
    eprintln!("archive: {}", bundle.archive_name());
    Ok(exit_codes::EXIT_SUCCESS)
}
