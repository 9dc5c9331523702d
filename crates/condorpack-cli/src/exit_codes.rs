//! Exit codes of the `condorpack` binary.
//! These codes are part of the public contract; batch tooling branches on them.

use condorpack_core::BundleError;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1; // Anything not classified below
pub const EXIT_CONFIG_ERROR: i32 = 2; // Missing environment, bad settings or parameters
pub const EXIT_CREDENTIAL_INVALID: i32 = 3; // Proxy missing or expired
pub const EXIT_BUILD_ERROR: i32 = 4; // Archive could not be built
pub const EXIT_TRANSFER_ERROR: i32 = 5; // Replica push failed, retrying is safe

/// Exit code for an error surfaced by a command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BundleError>())
        .map(|e| match e {
            BundleError::Config { .. } => EXIT_CONFIG_ERROR,
            BundleError::CredentialInvalid { .. } => EXIT_CREDENTIAL_INVALID,
            BundleError::Build { .. } => EXIT_BUILD_ERROR,
            BundleError::Transfer { .. } => EXIT_TRANSFER_ERROR,
        })
        .unwrap_or(EXIT_FAILURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_codes_match_core() {
        for err in [
            BundleError::config("x"),
            BundleError::credential("/tmp/x509up", "expired"),
            BundleError::build("/src", "missing"),
        ] {
            let code = err.exit_code();
            assert_eq!(for_error(&anyhow::Error::from(err)), code);
        }
    }

    #[test]
    fn test_context_is_transparent() {
        let err: anyhow::Result<()> = Err(BundleError::Transfer {
            name: "software/software.abc.tgz".into(),
            succeeded: 1,
            attempted: 3,
            message: "reset".into(),
        })
        .context("publishing software");
        assert_eq!(for_error(&err.unwrap_err()), EXIT_TRANSFER_ERROR);
    }

    #[test]
    fn test_unclassified() {
        assert_eq!(for_error(&anyhow::anyhow!("disk full")), EXIT_FAILURE);
    }
}
