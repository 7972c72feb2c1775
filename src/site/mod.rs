//! Site lifecycle workflows
//!
//! [`SiteLifecycleManager`] runs the ordered, fail-fast steps that bring a
//! site from requested to serving traffic, and the teardown that removes it.
//! Nothing is rolled back: a failed creation leaves the completed steps in
//! place, and a later deletion cleans them up. Every remote statement is
//! written so re-running it after a partial run is harmless.

pub mod commands;
pub mod descriptor;

use std::sync::Arc;

use tracing::{info, warn};

use crate::dns::DnsClient;
use crate::exec::{RemoteExecutor, ShellScript};
use crate::ingress::{IngressAction, IngressManager};
use crate::Error;

pub use commands::{HostSuffix, SiteCommands, SiteLayout, WordpressProfile};
pub use descriptor::{DnsName, Nickname, SiteDescriptor, TenantNamespace};

/// One step of a workflow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Copy the template tree into the site directory
    CopySiteTemplate,
    /// Create the database and grant access
    CreateDatabase,
    /// Configure and install WordPress
    InitSite,
    /// Materialize the vhost file
    SetVhost,
    /// Insert the ServerName directive
    AddServerName,
    /// Restart the front-end server
    RestartWebServer,
    /// Create the Ingress
    CreateIngress,
    /// Register the DNS record
    RegisterDns,
    /// Drop the database and revoke grants
    DropDatabase,
    /// Remove the site directory
    RemoveSiteFiles,
    /// Remove ServerName lines from the vhost file
    RemoveServerName,
    /// Remove the vhost file
    RemoveVhost,
    /// Delete the Ingress
    DeleteIngress,
}

impl Step {
    /// Creation order
    pub const CREATE: [Step; 8] = [
        Step::CopySiteTemplate,
        Step::CreateDatabase,
        Step::InitSite,
        Step::SetVhost,
        Step::AddServerName,
        Step::RestartWebServer,
        Step::CreateIngress,
        Step::RegisterDns,
    ];

    /// Teardown order. The DNS record is left in place.
    pub const DELETE: [Step; 5] = [
        Step::DropDatabase,
        Step::RemoveSiteFiles,
        Step::RemoveServerName,
        Step::RemoveVhost,
        Step::DeleteIngress,
    ];

    /// Stable name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Step::CopySiteTemplate => "copy-site-template",
            Step::CreateDatabase => "create-database",
            Step::InitSite => "init-site",
            Step::SetVhost => "set-vhost",
            Step::AddServerName => "add-server-name",
            Step::RestartWebServer => "restart-web-server",
            Step::CreateIngress => "create-ingress",
            Step::RegisterDns => "register-dns",
            Step::DropDatabase => "drop-database",
            Step::RemoveSiteFiles => "remove-site-files",
            Step::RemoveServerName => "remove-server-name",
            Step::RemoveVhost => "remove-vhost",
            Step::DeleteIngress => "delete-ingress",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings shared by every site the operator provisions
#[derive(Clone, Debug)]
pub struct SiteSettings {
    /// Filesystem layout of the hosting image
    pub layout: SiteLayout,
    /// Theme and plugins for new sites
    pub wordpress: WordpressProfile,
    /// Suffix used for the site URL and ServerName
    pub cluster_suffix: HostSuffix,
    /// Domain the Ingress host and DNS record are published under
    pub public_domain: DnsName,
}

/// Runs the create and delete workflows against injected collaborators
pub struct SiteLifecycleManager {
    executor: Arc<dyn RemoteExecutor>,
    ingress: Arc<dyn IngressManager>,
    dns: Arc<dyn DnsClient>,
    settings: SiteSettings,
}

impl SiteLifecycleManager {
    /// Create a manager
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        ingress: Arc<dyn IngressManager>,
        dns: Arc<dyn DnsClient>,
        settings: SiteSettings,
    ) -> Self {
        Self {
            executor,
            ingress,
            dns,
            settings,
        }
    }

    /// Settings in use
    pub fn settings(&self) -> &SiteSettings {
        &self.settings
    }

    /// Provision `site`, stopping at the first failing step
    pub async fn create_site(&self, site: &SiteDescriptor) -> Result<(), Error> {
        info!(site = %site.site_label(), pod = %site.pod_target(), "creating site");
        for step in Step::CREATE {
            self.run_step(site, step).await?;
        }
        info!(
            site = %site.site_label(),
            host = %site.hostname(&self.settings.public_domain),
            "site created"
        );
        Ok(())
    }

    /// Tear down `site`, stopping at the first failing step
    pub async fn delete_site(&self, site: &SiteDescriptor) -> Result<(), Error> {
        info!(site = %site.site_label(), pod = %site.pod_target(), "deleting site");
        for step in Step::DELETE {
            self.run_step(site, step).await?;
        }
        info!(
            site = %site.site_label(),
            host = %site.hostname(&self.settings.public_domain),
            "site deleted; DNS record left in place"
        );
        Ok(())
    }

    async fn run_step(&self, site: &SiteDescriptor, step: Step) -> Result<(), Error> {
        let result = match step {
            Step::CreateIngress => self.ingress.apply(site, IngressAction::Create).await,
            Step::DeleteIngress => match self.ingress.apply(site, IngressAction::Delete).await {
                // A failed creation may never have reached the ingress step
                Err(e) if e.is_not_found() => {
                    info!(site = %site.site_label(), "ingress already absent");
                    Ok(())
                }
                other => other,
            },
            Step::RegisterDns => {
                let host = site.hostname(&self.settings.public_domain);
                self.dns.upsert_a_record(&host, site.ip).await
            }
            remote => {
                let script = self.script_for(site, remote);
                self.run_script(site, remote, &script).await
            }
        };

        match &result {
            Ok(()) => info!(site = %site.site_label(), step = %step, "step completed"),
            Err(e) => warn!(site = %site.site_label(), step = %step, error = %e, "step failed"),
        }
        result
    }

    fn script_for(&self, site: &SiteDescriptor, step: Step) -> ShellScript {
        let commands = SiteCommands::new(
            site,
            &self.settings.layout,
            &self.settings.wordpress,
            &self.settings.cluster_suffix,
        );
        match step {
            Step::CopySiteTemplate => commands.copy_template(),
            Step::CreateDatabase => commands.create_database(),
            Step::InitSite => commands.init_site(),
            Step::SetVhost => commands.set_vhost(),
            Step::AddServerName => commands.add_server_name(),
            Step::RestartWebServer => commands.restart_web_server(),
            Step::DropDatabase => commands.drop_database(),
            Step::RemoveSiteFiles => commands.remove_site_dir(),
            Step::RemoveServerName => commands.remove_server_name(),
            Step::RemoveVhost => commands.remove_vhost(),
            Step::CreateIngress | Step::DeleteIngress | Step::RegisterDns => ShellScript::new(),
        }
    }

    async fn run_script(
        &self,
        site: &SiteDescriptor,
        step: Step,
        script: &ShellScript,
    ) -> Result<(), Error> {
        let result = self
            .executor
            .execute(&site.pod_target(), &script.render())
            .await;
        result.check(step.name(), script.len())
    }
}
