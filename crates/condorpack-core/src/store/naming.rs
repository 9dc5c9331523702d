//! Naming conventions for replicated archives.
//!
//! # Key Schema
//!
//! ```text
//! {base_prefix}/{kind}/{base}.{fingerprint}.tgz       # replicas <= 0
//! {base_prefix}/{kind}/{base}.{fingerprint}.{i}.tgz   # replicas = N, i in 0..N
//! ```
//!
//! The fingerprint makes names content-addressed: the same name always
//! holds the same bytes, so replicas are never overwritten and can be shared
//! across submissions.

use object_store::path::Path;

/// How many copies of an archive are stored and how they are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaLayout {
    count: i32,
}

impl ReplicaLayout {
    pub fn new(count: i32) -> Self {
        Self { count }
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    /// Zero or negative counts store a single, unsuffixed object.
    pub fn is_unbounded(&self) -> bool {
        self.count <= 0
    }

    /// Object names holding the replicas of `name`, in index order.
    pub fn replica_names(&self, name: &str) -> Vec<String> {
        if self.is_unbounded() {
            vec![name.to_string()]
        } else {
            (0..self.count)
                .map(|i| replicated_name(name, &i.to_string()))
                .collect()
        }
    }

    /// File-name pattern matching the replicas of `name` (no directory).
    ///
    /// `software.abc.tgz` becomes `software.abc.{0..4}.tgz` for five
    /// replicas and `software.abc*.tgz` when unbounded.
    pub fn file_pattern(&self, name: &str) -> String {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        if self.is_unbounded() {
            let (stem, ext) = split_extension(file_name);
            format!("{stem}*{ext}")
        } else {
            replicated_name(file_name, &format!("{{0..{}}}", self.count - 1))
        }
    }
}

/// Insert `.{index}` before the extension of the file name in `name`.
pub fn replicated_name(name: &str, index: &str) -> String {
    let (dir, file_name) = match name.rsplit_once('/') {
        Some((dir, file_name)) => (Some(dir), file_name),
        None => (None, name),
    };
    let (stem, ext) = split_extension(file_name);
    let replicated = format!("{stem}.{index}{ext}");
    match dir {
        Some(dir) => format!("{dir}/{replicated}"),
        None => replicated,
    }
}

/// `a.b.tgz` -> (`a.b`, `.tgz`); names without a dot have no extension.
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(i) if i > 0 => file_name.split_at(i),
        _ => (file_name, ""),
    }
}

/// Builder for storage keys.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    /// Base prefix (e.g., "bundles/software")
    base_prefix: String,
}

impl KeyBuilder {
    /// Create a new key builder with the given base prefix.
    pub fn new(base_prefix: impl Into<String>) -> Self {
        Self {
            base_prefix: base_prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn base_prefix(&self) -> &str {
        &self.base_prefix
    }

    /// Key for a logical object name.
    ///
    /// Returns: `{base}/{name}` with each segment sanitized.
    pub fn object_key(&self, name: &str) -> Path {
        let name = name
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(Self::sanitize_segment)
            .collect::<Vec<_>>()
            .join("/");
        if self.base_prefix.is_empty() {
            Path::from(name)
        } else {
            Path::from(format!("{}/{}", self.base_prefix, name))
        }
    }

    /// Replaces characters that are unsafe in object keys.
    fn sanitize_segment(segment: &str) -> String {
        segment
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}
