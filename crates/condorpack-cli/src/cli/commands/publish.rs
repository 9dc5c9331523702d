use std::path::Path;

use condorpack_core::BundlePublisher;

use super::common;
use crate::cli::args::PublishArgs;
use crate::exit_codes;

pub async fn run(args: PublishArgs, config: Option<&Path>) -> anyhow::Result<i32> {
    let session = common::load(config)?;
    let replicas = args
        .replicas
        .unwrap_or_else(|| common::default_replicas(args.target.kind));
    let bundle = common::prepare(&args.target, &session.env, replicas).await?;

    let store = common::open_store(&session.settings.store, args.store.as_deref())?;
    let publisher = BundlePublisher::new(store, session.settings.tmp_dir());
    let set = publisher.publish(&bundle).await?;

    println!("{}", serde_json::to_string_pretty(&set)?);
    Ok(exit_codes::EXIT_SUCCESS)
}
