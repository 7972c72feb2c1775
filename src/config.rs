//! Operator configuration
//!
//! Every setting is a CLI flag with an environment fallback so the operator
//! can be configured entirely from its Deployment manifest. Raw values are
//! validated into typed settings before the controller starts.

use std::time::Duration;

use clap::Args;

use crate::dns::{DnsSettings, DEFAULT_TTL};
use crate::site::{DnsName, HostSuffix, SiteLayout, SiteSettings, WordpressProfile};
use crate::telemetry::LogFormat;
use crate::Error;

/// DNS API key read from the environment; never printed
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// The key text
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Settings for the MultiSite controller
#[derive(Args, Clone, Debug)]
pub struct OperatorConfig {
    /// Domain site hostnames are published under (Ingress host and DNS record)
    #[arg(long, env = "MULTISITE_PUBLIC_DOMAIN", default_value = "tripanels.com")]
    pub public_domain: String,

    /// Fixed suffix for the site URL and ServerName; derived from the pod's
    /// FQDN when unset
    #[arg(long, env = "MULTISITE_CLUSTER_SUFFIX")]
    pub cluster_suffix: Option<String>,

    /// Certificate secret referenced by every site Ingress
    #[arg(long, env = "MULTISITE_TLS_SECRET", default_value = crate::ingress::DEFAULT_TLS_SECRET)]
    pub tls_secret: String,

    /// Upper bound for one remote exec call, in seconds
    #[arg(long, env = "MULTISITE_EXEC_TIMEOUT_SECS", default_value_t = 150)]
    pub exec_timeout_secs: u64,

    /// Delay before retrying a failed teardown, in seconds
    #[arg(long, env = "MULTISITE_TEARDOWN_RETRY_SECS", default_value_t = 600)]
    pub teardown_retry_secs: u64,

    /// Attempts at writing the reconcile outcome back to the MultiSite (0 retries forever)
    #[arg(long, env = "MULTISITE_PERSIST_ATTEMPTS", default_value_t = 3)]
    pub persist_attempts: u32,

    /// WordPress template tree inside the site container
    #[arg(long, env = "MULTISITE_TEMPLATE_DIR", default_value = "/usr/src/wordpress")]
    pub template_dir: String,

    /// Parent directory of per-site trees
    #[arg(long, env = "MULTISITE_SITE_ROOT", default_value = "/cloudclusters/wordpress")]
    pub site_root: String,

    /// Vhost template file
    #[arg(long, env = "MULTISITE_VHOST_TEMPLATE", default_value = "/config/000-default.conf")]
    pub vhost_template: String,

    /// Directory per-site vhost files are written to
    #[arg(long, env = "MULTISITE_VHOST_DIR", default_value = "/cloudclusters/config/apache")]
    pub vhost_dir: String,

    /// supervisord program restarted after a vhost change
    #[arg(long, env = "MULTISITE_WEB_SERVICE", default_value = "apache")]
    pub web_service: String,

    /// Theme activated on new sites
    #[arg(long, env = "MULTISITE_WP_THEME", default_value = "twentyseventeen")]
    pub wp_theme: String,

    /// Plugins installed on new sites, comma separated
    #[arg(
        long,
        env = "MULTISITE_WP_PLUGINS",
        value_delimiter = ',',
        default_value = "WP Super Cache,All-in-One WP Migration"
    )]
    pub wp_plugins: Vec<String>,

    /// Base URL of the PowerDNS API
    #[arg(
        long,
        env = "PDNS_API_URL",
        default_value = "https://testpdns-api.cloudclusters.net:8000"
    )]
    pub dns_api_url: String,

    /// Zone site records are written to
    #[arg(long, env = "PDNS_ZONE", default_value = "tripanels.com")]
    pub dns_zone: String,

    /// TTL of site records, in seconds
    #[arg(long, env = "PDNS_TTL", default_value_t = DEFAULT_TTL)]
    pub dns_ttl: u32,

    /// PowerDNS API key
    #[arg(long, env = "PDNSKEY", hide_env_values = true)]
    pub dns_api_key: Option<ApiKey>,

    /// Upper bound for one DNS API request, in seconds
    #[arg(long, env = "PDNS_TIMEOUT_SECS", default_value_t = 30)]
    pub dns_timeout_secs: u64,

    /// Treat non-2xx DNS API responses as success
    #[arg(long, env = "PDNS_IGNORE_STATUS")]
    pub dns_ignore_status: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl OperatorConfig {
    /// Per-call exec timeout
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    /// Teardown retry backoff
    pub fn teardown_retry(&self) -> Duration {
        Duration::from_secs(self.teardown_retry_secs)
    }

    /// Validated settings for the site workflows
    pub fn site_settings(&self) -> Result<SiteSettings, Error> {
        let layout = SiteLayout {
            template_dir: self.template_dir.clone(),
            site_root: self.site_root.clone(),
            vhost_template: self.vhost_template.clone(),
            vhost_dir: self.vhost_dir.clone(),
            web_service: self.web_service.clone(),
            ..SiteLayout::default()
        };
        layout.validate()?;

        let wordpress = WordpressProfile {
            theme: self.wp_theme.clone(),
            plugins: self
                .wp_plugins
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        };
        wordpress.validate()?;

        let cluster_suffix = match &self.cluster_suffix {
            Some(suffix) => HostSuffix::Fixed(DnsName::parse(suffix)?),
            None => HostSuffix::PodHostname,
        };

        Ok(SiteSettings {
            layout,
            wordpress,
            cluster_suffix,
            public_domain: DnsName::parse(&self.public_domain)?,
        })
    }

    /// Validated settings for the DNS client
    pub fn dns_settings(&self) -> Result<DnsSettings, Error> {
        let api_key = self
            .dns_api_key
            .as_ref()
            .filter(|key| !key.expose().is_empty())
            .ok_or_else(|| Error::validation("PDNSKEY must be set"))?;

        let api_url = reqwest::Url::parse(&self.dns_api_url)
            .map_err(|e| Error::validation(format!("invalid DNS API URL '{}': {}", self.dns_api_url, e)))?;

        Ok(DnsSettings {
            api_url: api_url.as_str().trim_end_matches('/').to_string(),
            zone: DnsName::parse(&self.dns_zone)?,
            ttl: self.dns_ttl,
            api_key: api_key.expose().to_string(),
            timeout: Duration::from_secs(self.dns_timeout_secs),
            ignore_status: self.dns_ignore_status,
        })
    }
}
