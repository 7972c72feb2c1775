//! MultiSite controller implementation
//!
//! Each notification re-reads the object and drives it through a small state
//! machine:
//!
//! - gone: nothing to do
//! - deletion requested: run teardown, then drop the finalizer
//! - `Init`: run creation once, record `Success` or `Failed`, add the finalizer
//! - `Success` / `Failed`: terminal until deletion
//!
//! The `Init` check is the only guard against running creation twice, so the
//! outcome is persisted with retries before the reconcile returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::OperatorConfig;
use crate::crd::{MultiSite, SiteStatus};
use crate::dns::PowerDnsClient;
use crate::exec::KubeExecutor;
use crate::ingress::KubeIngressManager;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::site::{SiteDescriptor, SiteLifecycleManager};
use crate::{Error, FIELD_MANAGER};

/// Requeue delay after a failed reconcile that is not a teardown
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Kubernetes operations the reconciler needs on MultiSite objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch the current object, `None` if it no longer exists
    async fn get_site(&self, namespace: &str, name: &str) -> Result<Option<MultiSite>, Error>;

    /// Write back `spec.status`, `spec.errorMsg` and the finalizer list
    async fn persist_site(&self, site: &MultiSite) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Merge patch carrying the reconcile outcome
pub(crate) fn outcome_patch(site: &MultiSite) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "finalizers": site.finalizers(),
        },
        "spec": {
            "status": site.spec.status,
            "errorMsg": site.spec.error_msg,
        }
    })
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_site(&self, namespace: &str, name: &str) -> Result<Option<MultiSite>, Error> {
        let api: Api<MultiSite> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn persist_site(&self, site: &MultiSite) -> Result<(), Error> {
        let namespace = site
            .namespace()
            .ok_or_else(|| Error::validation("MultiSite must be namespaced"))?;
        let api: Api<MultiSite> = Api::namespaced(self.client.clone(), &namespace);

        api.patch(
            &site.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&outcome_patch(site)),
        )
        .await
        .map_err(|e| Error::persistence(e.to_string()))?;

        Ok(())
    }
}

/// Controller context shared by every reconcile
pub struct Context {
    /// Kubernetes client for MultiSite reads and writes
    pub kube: Arc<dyn KubeClient>,
    /// Create and delete workflows
    pub lifecycle: Arc<SiteLifecycleManager>,
    /// Delay before retrying a failed teardown
    pub teardown_retry: Duration,
    /// Retry policy for persisting the outcome
    pub persist_retry: RetryConfig,
}

impl Context {
    /// Create a context from its parts
    pub fn new(
        kube: Arc<dyn KubeClient>,
        lifecycle: Arc<SiteLifecycleManager>,
        teardown_retry: Duration,
        persist_retry: RetryConfig,
    ) -> Self {
        Self {
            kube,
            lifecycle,
            teardown_retry,
            persist_retry,
        }
    }

    /// Wire the production collaborators from operator configuration
    pub fn from_config(client: Client, config: &OperatorConfig) -> Result<Self, Error> {
        let settings = config.site_settings()?;
        let executor = KubeExecutor::new(client.clone(), config.exec_timeout());
        let ingress = KubeIngressManager::new(
            client.clone(),
            settings.public_domain.clone(),
            config.tls_secret.clone(),
        );
        let dns = PowerDnsClient::new(config.dns_settings()?)?;

        let lifecycle = SiteLifecycleManager::new(
            Arc::new(executor),
            Arc::new(ingress),
            Arc::new(dns),
            settings,
        );

        Ok(Self::new(
            Arc::new(KubeClientImpl::new(client)),
            Arc::new(lifecycle),
            config.teardown_retry(),
            RetryConfig::with_max_attempts(config.persist_attempts),
        ))
    }
}

/// Reconcile a MultiSite
///
/// The object handed in by the runtime may be stale, so the current version is
/// fetched first.
#[instrument(
    skip(site, ctx),
    fields(site = %site.name_any(), namespace = %site.namespace().unwrap_or_default())
)]
pub async fn reconcile(site: Arc<MultiSite>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = site.name_any();
    let namespace = site
        .namespace()
        .ok_or_else(|| Error::validation("MultiSite must be namespaced"))?;

    let Some(current) = ctx.kube.get_site(&namespace, &name).await? else {
        debug!("site no longer exists");
        return Ok(Action::await_change());
    };

    if current.is_deleting() {
        return teardown(current, &ctx).await;
    }

    match current.spec.status {
        SiteStatus::Init => provision(current, &ctx).await,
        status => {
            debug!(status = %status, "site already reconciled");
            Ok(Action::await_change())
        }
    }
}

/// Run the creation workflow once and record its outcome
async fn provision(mut site: MultiSite, ctx: &Context) -> Result<Action, Error> {
    info!("provisioning site");

    let outcome = match SiteDescriptor::from_resource(&site) {
        Ok(descriptor) => {
            let result = ctx.lifecycle.create_site(&descriptor).await;
            // Steps before the failure may have left artifacts behind
            site.add_finalizer();
            result
        }
        Err(e) => {
            warn!(error = %e, "site rejected before any step ran");
            Err(e)
        }
    };

    match &outcome {
        Ok(()) => info!("site provisioned"),
        Err(e) => warn!(error = %e, "site provisioning failed"),
    }
    site.record_outcome(outcome.map_err(|e| e.status_message()));

    persist(&site, ctx).await?;
    Ok(Action::await_change())
}

/// Run teardown and release the object once it succeeds
async fn teardown(mut site: MultiSite, ctx: &Context) -> Result<Action, Error> {
    if !site.has_finalizer() {
        debug!("no finalizer, nothing to tear down");
        return Ok(Action::await_change());
    }

    info!("tearing down site");
    let descriptor = SiteDescriptor::from_resource(&site)?;
    ctx.lifecycle.delete_site(&descriptor).await?;

    site.remove_finalizer();
    persist(&site, ctx).await?;
    info!("site torn down, finalizer removed");
    Ok(Action::await_change())
}

async fn persist(site: &MultiSite, ctx: &Context) -> Result<(), Error> {
    let kube = ctx.kube.clone();
    retry_with_backoff(&ctx.persist_retry, "persist_site", || {
        let kube = kube.clone();
        let site = site.clone();
        async move { kube.persist_site(&site).await }
    })
    .await
}

/// Error policy for the controller
///
/// Failed teardowns wait the configured backoff so the finalizer keeps the
/// object alive until cleanup succeeds. Everything else retries sooner.
pub fn error_policy(site: Arc<MultiSite>, error: &Error, ctx: Arc<Context>) -> Action {
    if site.is_deleting() {
        error!(
            ?error,
            site = %site.name_any(),
            retry_secs = ctx.teardown_retry.as_secs(),
            "teardown failed"
        );
        Action::requeue(ctx.teardown_retry)
    } else {
        error!(?error, site = %site.name_any(), "reconciliation failed");
        Action::requeue(ERROR_REQUEUE)
    }
}
