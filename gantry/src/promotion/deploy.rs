//! Deploy targets.

use crate::errors::DeployError;
use crate::utils::{generate_uuid, now_utc, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// One artifact handed to a deploy target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployArtifact {
    /// The output name.
    pub name: String,
    /// The content key.
    pub key: String,
    /// The payload.
    pub bytes: Vec<u8>,
}

/// Acknowledgement from a deploy target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReceipt {
    /// The environment deployed to.
    pub environment: String,
    /// Target-assigned deployment id.
    pub deployment_id: String,
    /// Content keys that were deployed.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// When the target accepted the deployment.
    pub deployed_at: Timestamp,
}

/// External collaborator that receives an approved artifact set.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Deploys `artifacts` to `environment`.
    async fn deploy(&self, environment: &str, artifacts: &[DeployArtifact]) -> Result<DeployReceipt, DeployError>;
}

/// Copies artifacts into `<root>/<environment>/<name>`, the way a static
/// hosting directory is populated.
///
/// A `manifest.json` listing the deployed keys is written last.
#[derive(Debug, Clone)]
pub struct DirectoryDeployTarget {
    root: PathBuf,
}

impl DirectoryDeployTarget {
    /// Creates a target rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory an environment deploys into.
    #[must_use]
    pub fn environment_dir(&self, environment: &str) -> PathBuf {
        self.root.join(environment)
    }
}

fn is_plain_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty() && path.file_name().is_some_and(|f| f == path.as_os_str())
}

#[async_trait]
impl DeployTarget for DirectoryDeployTarget {
    async fn deploy(&self, environment: &str, artifacts: &[DeployArtifact]) -> Result<DeployReceipt, DeployError> {
        if !is_plain_name(environment) {
            return Err(DeployError::Rejected {
                environment: environment.to_string(),
                message: "environment must be a plain directory name".to_string(),
            });
        }
        if let Some(bad) = artifacts.iter().find(|a| !is_plain_name(&a.name)) {
            return Err(DeployError::Rejected {
                environment: environment.to_string(),
                message: format!("artifact name '{}' is not a plain file name", bad.name),
            });
        }

        let dir = self.environment_dir(environment);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DeployError::Failed(format!("creating {}: {e}", dir.display())))?;
        for artifact in artifacts {
            tokio::fs::write(dir.join(&artifact.name), &artifact.bytes)
                .await
                .map_err(|e| DeployError::Failed(format!("writing {}: {e}", artifact.name)))?;
        }

        let receipt = DeployReceipt {
            environment: environment.to_string(),
            deployment_id: generate_uuid().to_string(),
            artifacts: artifacts.iter().map(|a| a.key.clone()).collect(),
            deployed_at: now_utc(),
        };
        let manifest = serde_json::to_vec_pretty(&receipt).map_err(|e| DeployError::Failed(e.to_string()))?;
        tokio::fs::write(dir.join("manifest.json"), manifest)
            .await
            .map_err(|e| DeployError::Failed(format!("writing manifest: {e}")))?;

        info!(
            environment = %environment,
            deployment_id = %receipt.deployment_id,
            artifacts = artifacts.len(),
            "Deployed to directory"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content_key;

    fn artifact(name: &str, bytes: &[u8]) -> DeployArtifact {
        DeployArtifact {
            name: name.to_string(),
            key: content_key(bytes),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_directory_deploy_writes_files_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let target = DirectoryDeployTarget::new(dir.path());

        let receipt = target
            .deploy("staging", &[artifact("app.tar", b"bundle")])
            .await
            .unwrap();

        assert_eq!(receipt.environment, "staging");
        assert_eq!(receipt.artifacts, vec![content_key(b"bundle")]);
        assert_eq!(std::fs::read(dir.path().join("staging/app.tar")).unwrap(), b"bundle");

        let manifest: DeployReceipt =
            serde_json::from_slice(&std::fs::read(dir.path().join("staging/manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest, receipt);
    }

    #[tokio::test]
    async fn test_directory_deploy_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let target = DirectoryDeployTarget::new(dir.path());

        let err = target.deploy("../prod", &[]).await.unwrap_err();
        assert!(matches!(err, DeployError::Rejected { .. }));

        let err = target
            .deploy("prod", &[artifact("../../etc/passwd", b"x")])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Rejected { .. }));
    }
}
