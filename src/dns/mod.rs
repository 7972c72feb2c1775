//! A-record registration against a PowerDNS-compatible HTTP API
//!
//! Each site gets one `A` record in a fixed zone, written with a single
//! `replace` rrset change so repeated registrations converge.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

use crate::site::DnsName;
use crate::Error;

/// Header carrying the pre-shared API key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Default record TTL in seconds
pub const DEFAULT_TTL: u32 = 86400;

/// Default bound on one DNS API request
pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(30);

/// Registers DNS records for sites
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DnsClient: Send + Sync {
    /// Point `hostname` at `ip`, replacing any existing A record
    async fn upsert_a_record(&self, hostname: &str, ip: IpAddr) -> Result<(), Error>;
}

/// Body of a zone PATCH request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ZonePatch {
    /// Record set changes
    pub rrsets: Vec<RrSet>,
}

/// One record set change
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RrSet {
    /// Fully qualified owner name, with trailing dot
    pub name: String,
    /// Always `replace`
    pub changetype: String,
    /// Record type
    #[serde(rename = "type")]
    pub record_type: String,
    /// Time to live in seconds
    pub ttl: u32,
    /// Record contents
    pub records: Vec<Record>,
}

/// Single record in a record set
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    /// Address the record resolves to
    pub content: String,
    /// Whether the record is served
    pub disabled: bool,
}

/// Build the PATCH body replacing the address record of `hostname`.
///
/// IPv6 addresses produce an `AAAA` record.
pub fn a_record_patch(hostname: &str, ip: IpAddr, ttl: u32) -> ZonePatch {
    let name = if hostname.ends_with('.') {
        hostname.to_string()
    } else {
        format!("{}.", hostname)
    };

    ZonePatch {
        rrsets: vec![RrSet {
            name,
            changetype: "replace".to_string(),
            record_type: match ip {
                IpAddr::V4(_) => "A",
                IpAddr::V6(_) => "AAAA",
            }
            .to_string(),
            ttl,
            records: vec![Record {
                content: ip.to_string(),
                disabled: false,
            }],
        }],
    }
}

/// Connection settings for the DNS API
#[derive(Clone)]
pub struct DnsSettings {
    /// Base URL, e.g. `https://pdns.example.net:8000`
    pub api_url: String,
    /// Zone records are written to
    pub zone: DnsName,
    /// Record TTL
    pub ttl: u32,
    /// Pre-shared API key
    pub api_key: String,
    /// Bound on one request
    pub timeout: Duration,
    /// Accept non-2xx responses as success
    pub ignore_status: bool,
}

impl std::fmt::Debug for DnsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsSettings")
            .field("api_url", &self.api_url)
            .field("zone", &self.zone)
            .field("ttl", &self.ttl)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("ignore_status", &self.ignore_status)
            .finish()
    }
}

impl DnsSettings {
    /// Zone endpoint the PATCH is sent to
    pub fn zone_url(&self) -> String {
        format!(
            "{}/api/v1/servers/localhost/zones/{}",
            self.api_url.trim_end_matches('/'),
            self.zone
        )
    }
}

/// [`DnsClient`] for the PowerDNS HTTP API
pub struct PowerDnsClient {
    http: reqwest::Client,
    settings: DnsSettings,
}

impl PowerDnsClient {
    /// Build a client; the request timeout comes from `settings`
    pub fn new(settings: DnsSettings) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::dns(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, settings })
    }
}

#[async_trait]
impl DnsClient for PowerDnsClient {
    async fn upsert_a_record(&self, hostname: &str, ip: IpAddr) -> Result<(), Error> {
        let url = self.settings.zone_url();
        let body = a_record_patch(hostname, ip, self.settings.ttl);

        let response = self
            .http
            .patch(&url)
            .header(API_KEY_HEADER, &self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("DNS API request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            if self.settings.ignore_status {
                warn!(hostname = %hostname, status = %status, body = %detail, "DNS API returned non-success status, ignoring");
            } else {
                return Err(Error::dns(format!(
                    "DNS API returned {} for {}: {}",
                    status, hostname, detail
                )));
            }
        }

        info!(hostname = %hostname, ip = %ip, zone = %self.settings.zone, "registered A record");
        Ok(())
    }
}
