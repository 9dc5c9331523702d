//! Exclusion rules for archive entries.
//!
//! Rules are evaluated against POSIX paths relative to the source root.
//! A path is excluded when the path itself or any of its ancestors matches,
//! so excluding a directory drops its whole subtree regardless of whether
//! the archive is built from a tree walk or from a file listing.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BundleError, BundleResult};

/// VCS internals, bytecode caches, compiled python files and nested archives.
pub const COMPILED_ARTIFACTS: &str = r"(^|/)(\.git|__pycache__)$|\.(pyc|tgz)$";

/// Top-level repository directories never shipped to jobs.
pub const REPO_TOP_LEVEL: &[&str] = &["docs", "data", ".law", ".setups"];

/// Scratch area of a framework checkout.
pub const SANDBOX_SCRATCH: &str = r"^src/tmp(/|$)";

/// VCS internals at any depth.
pub const VCS_DIRS: &str = r"(^|/)\.git$";

static COMPILED_ARTIFACTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(COMPILED_ARTIFACTS).expect("COMPILED_ARTIFACTS is a valid regex"));
static SANDBOX_SCRATCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(SANDBOX_SCRATCH).expect("SANDBOX_SCRATCH is a valid regex"));
static VCS_DIRS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(VCS_DIRS).expect("VCS_DIRS is a valid regex"));

#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    top_level: BTreeSet<String>,
    patterns: Vec<Regex>,
}

impl ExcludeRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude top-level directories (or files) by exact name.
    pub fn with_top_level<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.top_level.extend(names.into_iter().map(Into::into));
        self
    }

    /// Exclude paths matching a regular expression.
    pub fn with_pattern(mut self, pattern: &str) -> BundleResult<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            BundleError::config(format!("invalid exclude pattern '{pattern}': {e}"))
        })?;
        self.patterns.push(regex);
        Ok(self)
    }

    /// Rules for the software stack.
    pub fn software() -> Self {
        Self::new().with_builtin(&COMPILED_ARTIFACTS_RE)
    }

    /// Rules for the analysis repository.
    pub fn repo() -> Self {
        Self::new()
            .with_top_level(REPO_TOP_LEVEL.iter().copied())
            .with_builtin(&COMPILED_ARTIFACTS_RE)
    }

    /// Rules for a framework sandbox area.
    pub fn sandbox() -> Self {
        Self::new()
            .with_top_level(["tmp"])
            .with_builtin(&SANDBOX_SCRATCH_RE)
            .with_builtin(&VCS_DIRS_RE)
    }

    fn with_builtin(mut self, regex: &Regex) -> Self {
        self.patterns.push(regex.clone());
        self
    }

    /// Whether `rel_path` (relative, `/`-separated) must be left out.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        let rel_path = rel_path.trim_start_matches("./").trim_matches('/');
        if rel_path.is_empty() {
            return false;
        }

        let top = rel_path.split('/').next().unwrap_or(rel_path);
        if self.top_level.contains(top) {
            return true;
        }

        ancestors(rel_path).any(|prefix| self.patterns.iter().any(|p| p.is_match(prefix)))
    }
}

/// `a/b/c` yields `a`, `a/b`, `a/b/c`.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(move |(i, _)| &path[..i])
        .chain(std::iter::once(path))
}
