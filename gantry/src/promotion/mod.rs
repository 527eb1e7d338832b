//! Promotion gating and deployment.
//!
//! A finished run is evaluated against a [`PromotionPolicy`] for one target
//! environment. Approved runs are handed to a [`DeployTarget`] and the rung
//! is recorded so the next environment in the ladder becomes reachable.

mod deploy;
mod gate;
#[cfg(feature = "http-deploy")]
mod http;
mod policy;

pub use deploy::{DeployArtifact, DeployReceipt, DeployTarget, DirectoryDeployTarget};
#[cfg(test)]
pub use deploy::MockDeployTarget;
pub use gate::{PromotionGate, PromotionLedger};
#[cfg(feature = "http-deploy")]
pub use http::HttpDeployTarget;
pub use policy::{PromotionDecision, PromotionPolicy, DEFAULT_TAG_PATTERN};
