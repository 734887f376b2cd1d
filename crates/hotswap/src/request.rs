// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Update request and the pre-flight checks run before any side effect

use crate::error::{Result, SwapError};
use crate::platform::Platform;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

/// What to swap. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Service wrapping the artifact; `None` when it is not service-managed
    pub service_identity: Option<String>,
    pub new_artifact: PathBuf,
    pub target_artifact: PathBuf,
    pub backup_dir: PathBuf,
}

impl UpdateRequest {
    /// An empty or blank identity means no service management
    pub fn new(
        service_identity: Option<&str>,
        new_artifact: impl Into<PathBuf>,
        target_artifact: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service_identity: service_identity
                .map(str::trim)
                .filter(|identity| !identity.is_empty())
                .map(ToString::to_string),
            new_artifact: new_artifact.into(),
            target_artifact: target_artifact.into(),
            backup_dir: backup_dir.into(),
        }
    }
}

fn require(path: &Path, name: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(SwapError::Parameter(format!("{name} must not be empty")));
    }
    Ok(())
}

/// Fails with `Parameter` on empty inputs and `Permission` without elevation
pub fn validate(request: &UpdateRequest, platform: &dyn Platform) -> Result<()> {
    require(&request.new_artifact, "new artifact path")?;
    require(&request.target_artifact, "target artifact path")?;
    require(&request.backup_dir, "backup directory")?;

    if request.target_artifact.file_name().is_none() {
        return Err(SwapError::Parameter(format!(
            "target artifact path {} does not name a file",
            request.target_artifact.display()
        )));
    }

    if !platform.is_elevated() {
        return Err(SwapError::Permission(
            "managing services and system files requires an elevated account".to_owned(),
        ));
    }

    Ok(())
}

/// SHA256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Integrity check of the new artifact against the checksum shipped with it.
///
/// A missing artifact is left to the replacer, which reports `SourceMissing`.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let actual = sha256_file(path)?;
    let expected = expected.trim().to_lowercase();
    if actual != expected {
        return Err(SwapError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakePlatform;
    use tempfile::TempDir;

    fn request() -> UpdateRequest {
        UpdateRequest::new(Some("Svc"), "new.bin", "old.bin", "backup")
    }

    #[test]
    fn test_blank_identity_is_absent() {
        let req = UpdateRequest::new(Some("   "), "a", "b", "c");
        assert!(req.service_identity.is_none());
        let req = UpdateRequest::new(None, "a", "b", "c");
        assert!(req.service_identity.is_none());
        assert_eq!(request().service_identity.as_deref(), Some("Svc"));
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate(&request(), &FakePlatform::new()).is_ok());
    }

    #[test]
    fn test_empty_paths_are_parameter_errors() {
        let platform = FakePlatform::new();
        for req in [
            UpdateRequest::new(Some("Svc"), "", "old.bin", "backup"),
            UpdateRequest::new(Some("Svc"), "new.bin", "", "backup"),
            UpdateRequest::new(Some("Svc"), "new.bin", "old.bin", ""),
        ] {
            let err = validate(&req, &platform).unwrap_err();
            assert!(matches!(err, SwapError::Parameter(_)), "{err}");
        }
    }

    #[test]
    fn test_parameters_checked_before_privileges() {
        let platform = FakePlatform::new().with_elevated(false);
        let req = UpdateRequest::new(None, "", "old.bin", "backup");
        assert!(matches!(
            validate(&req, &platform),
            Err(SwapError::Parameter(_))
        ));
    }

    #[test]
    fn test_not_elevated_is_permission_error() {
        let platform = FakePlatform::new().with_elevated(false);
        assert!(matches!(
            validate(&request(), &platform),
            Err(SwapError::Permission(_))
        ));
    }

    #[test]
    fn test_checksum_match_and_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.bin");
        std::fs::write(&path, b"test data").unwrap();

        let digest = sha256_file(&path).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(verify_checksum(&path, &digest.to_uppercase()).is_ok());

        let err = verify_checksum(&path, "00").unwrap_err();
        assert!(matches!(err, SwapError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_checksum_skipped_for_missing_artifact() {
        let dir = TempDir::new().unwrap();
        assert!(verify_checksum(&dir.path().join("missing"), "00").is_ok());
    }
}
