use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use tar::{Builder, EntryType, Header};

pub(crate) fn create_deterministic_tar<W: Write>(writer: W) -> Builder<GzEncoder<W>> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(writer, Compression::default());

    let mut tar = Builder::new(encoder);
    tar.mode(tar::HeaderMode::Deterministic);
    tar
}

fn base_header(entry_type: EntryType, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

pub(crate) fn normalized_mode(executable: bool) -> u32 {
    if executable {
        0o755
    } else {
        0o644
    }
}

pub(crate) fn append_dir<W: Write>(tar: &mut Builder<W>, name: &str) -> Result<()> {
    let mut header = base_header(EntryType::Directory, 0o755);
    header.set_size(0);
    tar.append_data(&mut header, format!("{name}/"), std::io::empty())
        .with_context(|| format!("appending directory {name}"))
}

pub(crate) fn append_file<W: Write, R: Read>(
    tar: &mut Builder<W>,
    name: &str,
    size: u64,
    executable: bool,
    data: R,
) -> Result<()> {
    let mut header = base_header(EntryType::Regular, normalized_mode(executable));
    header.set_size(size);
    tar.append_data(&mut header, name, data)
        .with_context(|| format!("appending file {name}"))
}

pub(crate) fn append_symlink<W: Write>(
    tar: &mut Builder<W>,
    name: &str,
    target: &Path,
) -> Result<()> {
    let mut header = base_header(EntryType::Symlink, 0o777);
    header.set_size(0);
    tar.append_link(&mut header, name, target)
        .with_context(|| format!("appending symlink {name}"))
}
