//! Content fingerprints identifying the state of a bundle's source.
//!
//! A fingerprint is the identity of an archive: it is embedded in the
//! archive name, so equal fingerprints mean the published archive can be
//! reused and different fingerprints never overwrite each other.

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{BundleError, BundleResult};

/// Opaque content identity, safe to embed in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accept a checksum computed elsewhere (e.g. by a snapshot tool).
    pub fn from_checksum(checksum: impl Into<String>) -> BundleResult<Self> {
        let checksum = checksum.into();
        let valid = !checksum.is_empty()
            && checksum
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(BundleError::config(format!(
                "checksum '{checksum}' cannot be used in an archive name"
            )));
        }
        Ok(Self(checksum))
    }

    /// Hash an ordered list of `(key, value)` pairs.
    ///
    /// The list is encoded as a JSON array before hashing, which keeps the
    /// encoding unambiguous for any key or value content.
    pub fn of_pairs<K, V>(pairs: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(k, v)| (k.as_ref(), v.as_ref()))
            .collect();
        // Serializing string tuples cannot fail.
        let bytes = serde_json::to_vec(&encoded).unwrap_or_default();
        Self(sha256_hex(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub(crate) fn sha256_hex_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn sha256_file(path: &Path) -> io::Result<String> {
    sha256_hex_reader(std::fs::File::open(path)?)
}

/// Fingerprint of the software stack from its flag files.
///
/// Flag files are read in the given order; each existing file contributes
/// its path and trimmed content. Missing files are skipped, so a stack with
/// a flag file not yet written hashes like one without that entry.
pub fn software_fingerprint(flag_files: &[PathBuf]) -> BundleResult<Fingerprint> {
    if flag_files.is_empty() {
        warn!("no software flag files configured, fingerprint covers nothing");
    }

    let mut contents = Vec::with_capacity(flag_files.len());
    for flag_file in flag_files {
        match std::fs::read_to_string(flag_file) {
            Ok(content) => {
                contents.push((flag_file.display().to_string(), content.trim().to_string()));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %flag_file.display(), "skipping missing software flag file");
            }
            Err(e) => {
                return Err(BundleError::build(
                    flag_file,
                    format!("failed to read flag file: {e}"),
                ));
            }
        }
    }

    Ok(Fingerprint::of_pairs(&contents))
}

/// Fingerprint of a sandbox bundle.
///
/// Combines the checksum of the framework area with the identity (path and
/// content) of the sandbox file that selects it.
pub fn sandbox_fingerprint(
    base_checksum: &Fingerprint,
    sandbox_file: &Path,
) -> BundleResult<Fingerprint> {
    let content = std::fs::read_to_string(sandbox_file).map_err(|e| {
        BundleError::build(sandbox_file, format!("failed to read sandbox file: {e}"))
    })?;
    let file_name = sandbox_file.display().to_string();
    Ok(Fingerprint::of_pairs(&[
        ("base", base_checksum.as_str()),
        ("sandbox_file", file_name.as_str()),
        ("sandbox_content", content.trim()),
    ]))
}
