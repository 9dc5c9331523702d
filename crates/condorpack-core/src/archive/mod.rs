//! Deterministic, filtered `.tgz` archives of a directory tree or a
//! repository snapshot.
//!
//! For fixed source content and fixed rules the archive holds the same
//! entries with the same bytes: entries are sorted, owners and mtimes are
//! zeroed and modes are normalized to `0o755`/`0o644`. The archive is written
//! to a temp file and owned by an [`ArchiveDescriptor`]; dropping the
//! descriptor removes the file.

pub mod exclude;
mod tar_write;

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tempfile::TempPath;
use tracing::debug;
use walkdir::WalkDir;

pub use exclude::ExcludeRules;

use crate::bundle::BundleKind;
use crate::error::{BundleError, BundleResult};
use crate::fingerprint::{sha256_file, Fingerprint};

/// What to archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    /// Walk a directory tree.
    Tree(PathBuf),
    /// Archive an explicit list of files relative to `root`.
    Listing { root: PathBuf, files: Vec<PathBuf> },
}

impl ArchiveSource {
    pub fn root(&self) -> &Path {
        match self {
            Self::Tree(root) => root,
            Self::Listing { root, .. } => root,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Dir,
    File { size: u64, executable: bool },
    Symlink(PathBuf),
}

#[derive(Debug, Clone)]
pub(crate) struct SourceEntry {
    pub rel: String,
    pub abs: PathBuf,
    pub kind: EntryKind,
}

/// A built archive waiting to be transferred.
#[derive(Debug)]
pub struct ArchiveDescriptor {
    pub kind: BundleKind,
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    path: TempPath,
}

impl ArchiveDescriptor {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the archive at `dest` instead of deleting it on drop.
    pub fn persist(self, dest: &Path) -> BundleResult<()> {
        match self.path.persist(dest) {
            Ok(()) => Ok(()),
            // rename fails across filesystems, fall back to a copy
            Err(err) => std::fs::copy(&err.path, dest).map(|_| ()).map_err(|e| {
                BundleError::build(dest, format!("failed to write archive: {e}"))
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    rules: ExcludeRules,
    root_name: Option<String>,
}

impl ArchiveBuilder {
    pub fn new(rules: ExcludeRules) -> Self {
        Self {
            rules,
            root_name: None,
        }
    }

    /// Place all entries below a single top-level directory.
    pub fn with_root(mut self, name: impl Into<String>) -> Self {
        let name = name.into().trim_matches('/').to_string();
        self.root_name = (!name.is_empty()).then_some(name);
        self
    }

    pub fn rules(&self) -> &ExcludeRules {
        &self.rules
    }

    /// Build the archive into a new temp file inside `tmp_dir`.
    ///
    /// The temp file is removed if anything fails, so a partial archive is
    /// never left behind.
    pub fn build(
        &self,
        source: &ArchiveSource,
        tmp_dir: &Path,
        kind: BundleKind,
        fingerprint: Fingerprint,
    ) -> BundleResult<ArchiveDescriptor> {
        let entries = match source {
            ArchiveSource::Tree(root) => collect_tree(root, &self.rules)?,
            ArchiveSource::Listing { root, files } => collect_listing(root, files, &self.rules)?,
        };

        let tmp = tempfile::Builder::new()
            .prefix(".condorpack-")
            .suffix(".tgz")
            .tempfile_in(tmp_dir)
            .map_err(|e| {
                BundleError::build(tmp_dir, format!("failed to create temp archive: {e}"))
            })?;

        self.write_entries(tmp.as_file(), &entries)
            .map_err(|e| BundleError::build(source.root(), format!("{e:#}")))?;

        let size_bytes = tmp
            .as_file()
            .metadata()
            .map_err(|e| BundleError::build(tmp.path(), e.to_string()))?
            .len();

        debug!(
            entries = entries.len(),
            size_bytes,
            source = %source.root().display(),
            "archive written"
        );

        Ok(ArchiveDescriptor {
            kind,
            fingerprint,
            size_bytes,
            path: tmp.into_temp_path(),
        })
    }

    fn entry_name(&self, rel: &str) -> String {
        match &self.root_name {
            Some(root) => format!("{root}/{rel}"),
            None => rel.to_string(),
        }
    }

    fn write_entries(&self, file: &File, entries: &[SourceEntry]) -> anyhow::Result<()> {
        let mut tar = tar_write::create_deterministic_tar(BufWriter::new(file));

        if let Some(root) = &self.root_name {
            tar_write::append_dir(&mut tar, root)?;
        }

        for entry in entries {
            let name = self.entry_name(&entry.rel);
            match &entry.kind {
                EntryKind::Dir => tar_write::append_dir(&mut tar, &name)?,
                EntryKind::Symlink(target) => tar_write::append_symlink(&mut tar, &name, target)?,
                EntryKind::File { size, executable } => {
                    let data = File::open(&entry.abs)
                        .with_context(|| format!("opening {}", entry.abs.display()))?;
                    tar_write::append_file(&mut tar, &name, *size, *executable, data.take(*size))?;
                }
            }
        }

        let encoder = tar.into_inner().context("finalizing tar archive")?;
        let mut writer = encoder.finish().context("compressing gzip stream")?;
        writer.flush().context("flushing archive")?;
        Ok(())
    }
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

fn entry_kind(path: &Path, meta: &std::fs::Metadata) -> BundleResult<Option<EntryKind>> {
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        let target = std::fs::read_link(path)
            .map_err(|e| BundleError::build(path, format!("failed to read link: {e}")))?;
        Ok(Some(EntryKind::Symlink(target)))
    } else if file_type.is_dir() {
        Ok(Some(EntryKind::Dir))
    } else if file_type.is_file() {
        Ok(Some(EntryKind::File {
            size: meta.len(),
            executable: is_executable(meta),
        }))
    } else {
        // sockets, fifos, devices
        Ok(None)
    }
}

/// Filtered entries of a directory tree, sorted by path.
pub(crate) fn collect_tree(root: &Path, rules: &ExcludeRules) -> BundleResult<Vec<SourceEntry>> {
    if !root.is_dir() {
        return Err(BundleError::build(root, "source directory does not exist"));
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            relative_name(root, e.path())
                .map(|rel| !rules.is_excluded(&rel))
                .unwrap_or(true)
        });

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| BundleError::build(root, e.to_string()))?;
        let Some(rel) = relative_name(root, entry.path()) else {
            continue;
        };
        let meta = entry
            .metadata()
            .map_err(|e| BundleError::build(entry.path(), e.to_string()))?;
        if let Some(kind) = entry_kind(entry.path(), &meta)? {
            entries.push(SourceEntry {
                rel,
                abs: entry.path().to_path_buf(),
                kind,
            });
        }
    }

    entries.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(entries)
}

/// Filtered entries of an explicit file listing, sorted by path.
///
/// Listed files that no longer exist on disk are skipped.
pub(crate) fn collect_listing(
    root: &Path,
    files: &[PathBuf],
    rules: &ExcludeRules,
) -> BundleResult<Vec<SourceEntry>> {
    if !root.is_dir() {
        return Err(BundleError::build(root, "source directory does not exist"));
    }

    let mut names: Vec<String> = files
        .iter()
        .map(|f| {
            let parts: Vec<String> = f
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            parts.join("/")
        })
        .filter(|rel| !rel.is_empty() && !rel.split('/').any(|p| p == ".."))
        .collect();
    names.sort();
    names.dedup();

    let mut entries = Vec::with_capacity(names.len());
    for rel in names {
        if rules.is_excluded(&rel) {
            continue;
        }
        let abs = root.join(&rel);
        let meta = match std::fs::symlink_metadata(&abs) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %rel, "listed file missing on disk, skipping");
                continue;
            }
            Err(e) => return Err(BundleError::build(&abs, e.to_string())),
        };
        match entry_kind(&abs, &meta)? {
            Some(EntryKind::Dir) | None => {
                debug!(path = %rel, "listed path is not a file, skipping");
            }
            Some(kind) => entries.push(SourceEntry { rel, abs, kind }),
        }
    }

    Ok(entries)
}

/// Checksum over the filtered content of a directory tree.
pub fn tree_checksum(root: &Path, rules: &ExcludeRules) -> BundleResult<Fingerprint> {
    let entries = collect_tree(root, rules)?;
    let mut pairs = Vec::with_capacity(entries.len());
    for entry in entries {
        let value = match entry.kind {
            EntryKind::Dir => "dir".to_string(),
            EntryKind::Symlink(target) => format!("link:{}", target.display()),
            EntryKind::File { executable, .. } => {
                let digest = sha256_file(&entry.abs)
                    .map_err(|e| BundleError::build(&entry.abs, e.to_string()))?;
                format!("file:{}:{digest}", tar_write::normalized_mode(executable))
            }
        };
        pairs.push((entry.rel, value));
    }
    Ok(Fingerprint::of_pairs(&pairs))
}

/// Scale a byte count to a readable unit.
pub fn human_bytes(n: u64) -> (f64, &'static str) {
    const UNITS: [&str; 6] = ["bytes", "kB", "MB", "GB", "TB", "PB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    (value, UNITS[unit])
}
