//! Repository snapshots: the checksum and file list of the analysis
//! repository as it would be shipped.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{BundleError, BundleResult};
use crate::fingerprint::{sha256_file, sha256_hex, Fingerprint};

/// Source of a repository's content identity.
pub trait RepoSnapshot: Send + Sync {
    /// Checksum of the current repository state.
    fn checksum(&self, repo: &Path) -> BundleResult<Fingerprint>;

    /// Files to ship, relative to the repository root.
    ///
    /// `None` means the whole tree (minus exclusions) is shipped.
    fn files(&self, repo: &Path) -> BundleResult<Option<Vec<PathBuf>>>;
}

/// Snapshot backed by `git`.
///
/// The checksum covers the checked-out commit, uncommitted changes to
/// tracked files and the content of untracked, non-ignored files, so any
/// edit that would change the shipped archive changes the checksum.
/// Initialized submodules are included recursively, both in the checksum and
/// in the shipped file list.
#[derive(Debug, Clone, Default)]
pub struct GitSnapshot;

impl GitSnapshot {
    fn run(repo: &Path, args: &[&str]) -> BundleResult<Vec<u8>> {
        let out = Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .map_err(|e| BundleError::build(repo, format!("failed to run git {args:?}: {e}")))?;
        if !out.status.success() {
            return Err(BundleError::build(
                repo,
                format!(
                    "git {:?} failed: {}",
                    args,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            ));
        }
        Ok(out.stdout)
    }

    fn split_nul(output: &[u8]) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = output
            .split(|b| *b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| PathBuf::from(String::from_utf8_lossy(s).into_owned()))
            .collect();
        files.sort();
        files
    }

    /// Initialized submodules at any depth, relative to `repo`.
    fn submodules(repo: &Path) -> BundleResult<Vec<PathBuf>> {
        let out = Self::run(
            repo,
            &[
                "submodule",
                "--quiet",
                "foreach",
                "--recursive",
                "printf '%s\\0' \"$displaypath\"",
            ],
        )?;
        Ok(Self::split_nul(&out))
    }

    /// Checksum inputs of a single work tree, keys prefixed with `prefix`.
    fn state(dir: &Path, prefix: &str) -> BundleResult<Vec<(String, String)>> {
        let head = String::from_utf8_lossy(&Self::run(dir, &["rev-parse", "HEAD"])?)
            .trim()
            .to_string();
        let diff = Self::run(dir, &["diff", "HEAD", "--binary"])?;

        let mut pairs = vec![
            (format!("{prefix}head"), head),
            (format!("{prefix}diff"), sha256_hex(&diff)),
        ];
        let untracked = Self::run(dir, &["ls-files", "--others", "--exclude-standard", "-z"])?;
        for file in Self::split_nul(&untracked) {
            let abs = dir.join(&file);
            // files vanishing between listing and hashing are ignored
            let Ok(digest) = sha256_file(&abs) else {
                debug!(path = %abs.display(), "untracked file vanished, skipping");
                continue;
            };
            pairs.push((format!("{prefix}{}", file.display()), digest));
        }
        Ok(pairs)
    }

    fn listing(dir: &Path) -> BundleResult<Vec<PathBuf>> {
        let out = Self::run(
            dir,
            &["ls-files", "--cached", "--others", "--exclude-standard", "-z"],
        )?;
        Ok(Self::split_nul(&out))
    }
}

impl RepoSnapshot for GitSnapshot {
    fn checksum(&self, repo: &Path) -> BundleResult<Fingerprint> {
        let mut pairs = Self::state(repo, "")?;
        for module in Self::submodules(repo)? {
            let prefix = format!("{}:", module.display());
            pairs.extend(Self::state(&repo.join(&module), &prefix)?);
        }
        Ok(Fingerprint::of_pairs(&pairs))
    }

    fn files(&self, repo: &Path) -> BundleResult<Option<Vec<PathBuf>>> {
        let mut files = Self::listing(repo)?;
        for module in Self::submodules(repo)? {
            let nested = Self::listing(&repo.join(&module))?;
            files.extend(nested.into_iter().map(|f| module.join(f)));
        }
        files.sort();
        Ok(Some(files))
    }
}

/// Snapshot with a checksum computed by an external tool.
#[derive(Debug, Clone)]
pub struct FixedSnapshot {
    checksum: Fingerprint,
}

impl FixedSnapshot {
    pub fn new(checksum: Fingerprint) -> Self {
        Self { checksum }
    }
}

impl RepoSnapshot for FixedSnapshot {
    fn checksum(&self, _repo: &Path) -> BundleResult<Fingerprint> {
        Ok(self.checksum.clone())
    }

    fn files(&self, _repo: &Path) -> BundleResult<Option<Vec<PathBuf>>> {
        Ok(None)
    }
}
