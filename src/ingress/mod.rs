//! Routing rule for a site's public hostname
//!
//! One `networking.k8s.io/v1` Ingress per site, named `{namespace}-{nickname}`
//! in the tenant namespace, routing `/` to the tenant's `{namespace}-cms`
//! Service on port 80 and terminating TLS with a shared certificate secret.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use crate::site::{DnsName, SiteDescriptor};
use crate::Error;

/// Port the tenant's backend Service listens on
pub const BACKEND_PORT: i32 = 80;

/// Default certificate secret shared by every site ingress
pub const DEFAULT_TLS_SECRET: &str = "certificates";

/// What to do with a site's routing rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngressAction {
    /// Create the Ingress; fails if it already exists
    Create,
    /// Delete the Ingress; fails if it is absent
    Delete,
}

impl std::fmt::Display for IngressAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Manages the routing rule of a site
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IngressManager: Send + Sync {
    /// Apply `action` to the site's Ingress. API errors are returned unmodified.
    async fn apply(&self, site: &SiteDescriptor, action: IngressAction) -> Result<(), Error>;
}

/// Build the Ingress object for a site
pub fn build_ingress(site: &SiteDescriptor, domain: &DnsName, tls_secret: &str) -> Ingress {
    let host = site.hostname(domain);

    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        crate::OPERATOR_NAME.to_string(),
    );
    labels.insert(
        crate::SITE_LABEL_KEY.to_string(),
        site.nickname.to_string(),
    );

    Ingress {
        metadata: ObjectMeta {
            name: Some(site.site_label()),
            namespace: Some(site.namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some(host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: site.backend_service(),
                                port: Some(ServiceBackendPort {
                                    number: Some(BACKEND_PORT),
                                    name: None,
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            tls: Some(vec![IngressTLS {
                hosts: Some(vec![host]),
                secret_name: Some(tls_secret.to_string()),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// [`IngressManager`] backed by the Kubernetes API
pub struct KubeIngressManager {
    client: Client,
    domain: DnsName,
    tls_secret: String,
}

impl KubeIngressManager {
    /// Create a manager publishing sites under `domain`
    pub fn new(client: Client, domain: DnsName, tls_secret: impl Into<String>) -> Self {
        Self {
            client,
            domain,
            tls_secret: tls_secret.into(),
        }
    }
}

#[async_trait]
impl IngressManager for KubeIngressManager {
    async fn apply(&self, site: &SiteDescriptor, action: IngressAction) -> Result<(), Error> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), site.namespace.as_str());
        let name = site.site_label();

        match action {
            IngressAction::Create => {
                let ingress = build_ingress(site, &self.domain, &self.tls_secret);
                api.create(&PostParams::default(), &ingress).await?;
                info!(ingress = %name, host = %site.hostname(&self.domain), "created ingress");
            }
            IngressAction::Delete => {
                api.delete(&name, &DeleteParams::default()).await?;
                info!(ingress = %name, "deleted ingress");
            }
        }
        Ok(())
    }
}
