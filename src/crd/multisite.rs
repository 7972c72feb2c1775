//! MultiSite Custom Resource Definition
//!
//! A MultiSite asks for one WordPress site inside a tenant's shared pod.
//! Provisioning state is recorded in the spec itself (`status`, `errorMsg`)
//! so existing manifests and tooling keep reading it from the same place.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer that guards teardown of a provisioned site
pub const MULTISITE_FINALIZER: &str = "multisite.jcy.ismewen.com/teardown";

/// Specification for a MultiSite
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "jcy.ismewen.com",
    version = "v1alpha1",
    kind = "MultiSite",
    plural = "multisites",
    shortname = "ms",
    namespaced,
    printcolumn = r#"{"name":"Nickname","type":"string","jsonPath":".spec.nickName"}"#,
    printcolumn = r#"{"name":"Pod","type":"string","jsonPath":".spec.podName"}"#,
    printcolumn = r#"{"name":"IP","type":"string","jsonPath":".spec.ip"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".spec.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MultiSiteSpec {
    /// Shared pod hosting the tenant's sites
    pub pod_name: String,

    /// Container running the web server and wp-cli
    pub container_name: String,

    /// Site identifier; becomes the database, directory and hostname label
    pub nick_name: String,

    /// Public address the DNS record points at
    pub ip: String,

    /// Provisioning state, written back by the operator
    #[serde(default)]
    pub status: SiteStatus,

    /// Failure detail when `status` is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

/// Provisioning state of a site
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SiteStatus {
    /// Not yet provisioned
    #[default]
    Init,
    /// Creation workflow completed
    Success,
    /// Creation workflow stopped at a failing step
    Failed,
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Success => write!(f, "Success"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl MultiSite {
    /// True while the finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == MULTISITE_FINALIZER))
    }

    /// True once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Record the outcome of the creation workflow
    pub fn record_outcome(&mut self, outcome: Result<(), String>) {
        match outcome {
            Ok(()) => {
                self.spec.status = SiteStatus::Success;
                self.spec.error_msg = None;
            }
            Err(message) => {
                self.spec.status = SiteStatus::Failed;
                self.spec.error_msg = Some(message);
            }
        }
    }

    /// Add the teardown finalizer if missing
    pub fn add_finalizer(&mut self) {
        if !self.has_finalizer() {
            self.metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(MULTISITE_FINALIZER.to_string());
        }
    }

    /// Remove the teardown finalizer, leaving any others in place
    pub fn remove_finalizer(&mut self) {
        if let Some(finalizers) = self.metadata.finalizers.as_mut() {
            finalizers.retain(|name| name != MULTISITE_FINALIZER);
        }
    }
}
