use std::path::Path;

use anyhow::Context;
use condorpack_core::archive::human_bytes;

use super::common;
use crate::cli::args::ArchiveArgs;
use crate::exit_codes;

pub async fn run(args: ArchiveArgs, config: Option<&Path>) -> anyhow::Result<i32> {
    let session = common::load(config)?;
    let bundle = common::prepare(
        &args.target,
        &session.env,
        common::default_replicas(args.target.kind),
    )
    .await?;

    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let tmp_dir = session.settings.tmp_dir();
    let out = args.out.clone();
    let size = tokio::task::spawn_blocking(move || -> anyhow::Result<u64> {
        let archive = bundle.build_archive(&tmp_dir)?;
        let size = archive.size_bytes;
        archive.persist(&out)?;
        Ok(size)
    })
    .await
    .context("archive task failed")??;

    let (value, unit) = human_bytes(size);
    eprintln!(
        "archive written: {} ({:.2} {})",
        args.out.display(),
        value,
        unit
    );
    Ok(exit_codes::EXIT_SUCCESS)
}
