//! Framework sandboxes: a shell file that, when sourced, sets up a CMSSW
//! area. The area pointed to by `CMSSW_BASE` is what gets bundled.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{BundleError, BundleResult};

/// Variable naming the framework area inside a sandbox environment.
pub const CMSSW_BASE: &str = "CMSSW_BASE";

const SOURCE_AND_PRINT: &str = r#"source "$1" >/dev/null 2>&1 || exit 3; printf '%s' "${!2}""#;

/// Evaluates variables of a sandbox environment file.
pub trait SandboxEnv: Send + Sync {
    /// Value of `name` after sourcing `sandbox_file`, `None` when unset.
    fn variable(&self, sandbox_file: &Path, name: &str) -> BundleResult<Option<String>>;
}

/// Sources sandbox files in a `bash` subprocess.
#[derive(Debug, Clone, Default)]
pub struct BashSandbox;

impl SandboxEnv for BashSandbox {
    fn variable(&self, sandbox_file: &Path, name: &str) -> BundleResult<Option<String>> {
        let out = Command::new("bash")
            .arg("-c")
            .arg(SOURCE_AND_PRINT)
            .arg("condorpack")
            .arg(sandbox_file)
            .arg(name)
            .output()
            .map_err(|e| BundleError::build(sandbox_file, format!("failed to run bash: {e}")))?;
        if !out.status.success() {
            return Err(BundleError::build(
                sandbox_file,
                format!("sourcing sandbox file failed ({})", out.status),
            ));
        }
        let value = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }
}

/// Resolve a sandbox file name.
///
/// Variables and `~` are expanded; relative names are looked up in
/// `<base>/sandboxes`.
pub fn resolve_sandbox_file(base: &Path, file: &str) -> BundleResult<PathBuf> {
    let expanded = shellexpand::full(file)
        .map_err(|e| BundleError::config(format!("cannot expand sandbox file '{file}': {e}")))?;
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(base.join("sandboxes").join(path))
    }
}

/// Short name of a sandbox, its file name without the `.sh` suffix.
pub fn sandbox_name(file: &Path) -> String {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(".sh").map(str::to_string).unwrap_or(name)
}

/// A resolved sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    pub file: PathBuf,
    pub name: String,
    pub cmssw_base: PathBuf,
}

impl Sandbox {
    pub fn resolve(base: &Path, file: &str, env: &dyn SandboxEnv) -> BundleResult<Self> {
        let file = resolve_sandbox_file(base, file)?;
        if !file.is_file() {
            return Err(BundleError::build(&file, "sandbox file does not exist"));
        }
        let cmssw_base = env.variable(&file, CMSSW_BASE)?.ok_or_else(|| {
            BundleError::config(format!(
                "sandbox {} does not define {CMSSW_BASE}",
                file.display()
            ))
        })?;
        Ok(Self {
            name: sandbox_name(&file),
            file,
            cmssw_base: PathBuf::from(cmssw_base),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEnv(Option<&'static str>);

    impl SandboxEnv for FixedEnv {
        fn variable(&self, _file: &Path, _name: &str) -> BundleResult<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    #[test]
    fn test_sandbox_name() {
        assert_eq!(sandbox_name(Path::new("/a/cmssw_default.sh")), "cmssw_default");
        assert_eq!(sandbox_name(Path::new("venv_columnar")), "venv_columnar");
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Path::new("/ap");
        assert_eq!(
            resolve_sandbox_file(base, "cmssw_default.sh").unwrap(),
            PathBuf::from("/ap/sandboxes/cmssw_default.sh")
        );
        assert_eq!(
            resolve_sandbox_file(base, "/opt/sb/x.sh").unwrap(),
            PathBuf::from("/opt/sb/x.sh")
        );
    }

    #[test]
    fn test_resolve_undefined_variable() {
        let err = resolve_sandbox_file(Path::new("/ap"), "$CONDORPACK_SURELY_UNSET_VAR/x.sh")
            .unwrap_err();
        assert!(matches!(err, BundleError::Config { .. }));
    }

    #[test]
    fn test_sandbox_resolve() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir(base.path().join("sandboxes")).unwrap();
        std::fs::write(base.path().join("sandboxes/cmssw_default.sh"), "# setup").unwrap();

        let sandbox = Sandbox::resolve(
            base.path(),
            "cmssw_default.sh",
            &FixedEnv(Some("/sw/CMSSW_10_6_30")),
        )
        .unwrap();
        assert_eq!(sandbox.name, "cmssw_default");
        assert_eq!(sandbox.cmssw_base, PathBuf::from("/sw/CMSSW_10_6_30"));

        let err = Sandbox::resolve(base.path(), "cmssw_default.sh", &FixedEnv(None)).unwrap_err();
        assert!(matches!(err, BundleError::Config { .. }));

        let err = Sandbox::resolve(base.path(), "missing.sh", &FixedEnv(None)).unwrap_err();
        assert!(matches!(err, BundleError::Build { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_bash_sandbox_reads_exported_variable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sb.sh");
        std::fs::write(&file, "export CMSSW_BASE=/sw/CMSSW_12_4_0\necho noise\n").unwrap();
        let value = BashSandbox.variable(&file, CMSSW_BASE).unwrap();
        assert_eq!(value.as_deref(), Some("/sw/CMSSW_12_4_0"));
        assert_eq!(BashSandbox.variable(&file, "CONDORPACK_UNSET").unwrap(), None);
    }
}
