//! Grid credentials checked before any job is configured.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{BundleError, BundleResult};

/// An access credential shipped with every remote job.
pub trait Credential: Send + Sync {
    /// Local file holding the credential.
    fn path(&self) -> &Path;

    /// Fail with `CredentialInvalid` unless the credential is usable now.
    fn validate(&self) -> BundleResult<()>;
}

/// A VOMS proxy certificate.
#[derive(Debug, Clone)]
pub struct VomsProxy {
    path: PathBuf,
    /// Minimum remaining lifetime in seconds.
    min_lifetime: u64,
}

impl VomsProxy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            min_lifetime: 0,
        }
    }

    /// `$X509_USER_PROXY`, or `/tmp/x509up_u<uid>`.
    pub fn default_location(x509_user_proxy: Option<&Path>) -> Self {
        match x509_user_proxy {
            Some(path) => Self::new(path),
            None => Self::new(format!("/tmp/x509up_u{}", nix::unistd::getuid())),
        }
    }

    pub fn with_min_lifetime(mut self, seconds: u64) -> Self {
        self.min_lifetime = seconds;
        self
    }

    /// Remaining lifetime in seconds as reported by `voms-proxy-info`.
    fn time_left(&self) -> BundleResult<u64> {
        let out = Command::new("voms-proxy-info")
            .arg("--file")
            .arg(&self.path)
            .arg("--timeleft")
            .output()
            .map_err(|e| {
                BundleError::credential(&self.path, format!("failed to run voms-proxy-info: {e}"))
            })?;
        if !out.status.success() {
            return Err(BundleError::credential(
                &self.path,
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        parse_time_left(&String::from_utf8_lossy(&out.stdout))
            .ok_or_else(|| BundleError::credential(&self.path, "unreadable proxy lifetime"))
    }
}

impl Credential for VomsProxy {
    fn path(&self) -> &Path {
        &self.path
    }

    fn validate(&self) -> BundleResult<()> {
        if !self.path.is_file() {
            return Err(BundleError::credential(&self.path, "proxy file does not exist"));
        }
        let left = self.time_left()?;
        debug!(path = %self.path.display(), seconds = left, "voms proxy lifetime");
        if left == 0 || left < self.min_lifetime {
            return Err(BundleError::credential(
                &self.path,
                format!("proxy expired or expiring ({left}s left)"),
            ));
        }
        Ok(())
    }
}

fn parse_time_left(output: &str) -> Option<u64> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse::<i64>().ok())
        .map(|v| v.max(0) as u64)
}

/// A credential with a fixed validity, for callers that check it elsewhere.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    path: PathBuf,
    valid: bool,
}

impl StaticCredential {
    pub fn valid(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            valid: true,
        }
    }

    pub fn expired(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            valid: false,
        }
    }
}

impl Credential for StaticCredential {
    fn path(&self) -> &Path {
        &self.path
    }

    fn validate(&self) -> BundleResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(BundleError::credential(&self.path, "credential expired"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_left() {
        assert_eq!(parse_time_left("43167\n"), Some(43167));
        assert_eq!(parse_time_left("\n  0 \n"), Some(0));
        assert_eq!(parse_time_left("-5"), Some(0));
        assert_eq!(parse_time_left("Proxy not found"), None);
        assert_eq!(parse_time_left(""), None);
    }

    #[test]
    fn test_default_location_prefers_env() {
        let proxy = VomsProxy::default_location(Some(Path::new("/home/ap/x509up")));
        assert_eq!(proxy.path(), Path::new("/home/ap/x509up"));

        let proxy = VomsProxy::default_location(None);
        assert!(proxy.path().to_string_lossy().starts_with("/tmp/x509up_u"));
    }

    #[test]
    fn test_missing_proxy_file() {
        let err = VomsProxy::new("/definitely/missing/x509up").validate().unwrap_err();
        assert!(err.is_credential_invalid());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_static_credential() {
        assert!(StaticCredential::valid("/tmp/x509up").validate().is_ok());
        assert!(StaticCredential::expired("/tmp/x509up")
            .validate()
            .unwrap_err()
            .is_credential_invalid());
    }
}
