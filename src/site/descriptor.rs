//! Validated site identity
//!
//! The nickname is interpolated into SQL statements, filesystem paths, sed
//! expressions and DNS names; the namespace into hostnames and object names.
//! Both are checked against an allow-list here, before any command is built.

use std::fmt;
use std::net::IpAddr;

use kube::ResourceExt;

use crate::crd::MultiSite;
use crate::exec::PodTarget;
use crate::Error;

/// Longest nickname accepted
pub const MAX_NICKNAME_LEN: usize = 32;

/// Longest DNS label
pub const MAX_DNS_LABEL_LEN: usize = 63;

/// Site identifier: database name, directory name and hostname label at once
///
/// Lowercase ASCII letters and digits, starting with a letter. Hyphens and
/// underscores are rejected because they are not valid in both an unquoted
/// MySQL identifier and a DNS label.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Nickname(String);

impl Nickname {
    /// Validate a nickname
    pub fn parse(value: &str) -> Result<Self, Error> {
        if value.is_empty() || value.len() > MAX_NICKNAME_LEN {
            return Err(Error::validation(format!(
                "nickname must be 1-{} characters, got {}",
                MAX_NICKNAME_LEN,
                value.len()
            )));
        }
        if !value.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(Error::validation(format!(
                "nickname '{}' must start with a lowercase letter",
                value
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(Error::validation(format!(
                "nickname '{}' may only contain lowercase letters and digits",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// The nickname text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant namespace, an RFC 1123 DNS label
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TenantNamespace(String);

impl TenantNamespace {
    /// Validate a namespace name
    pub fn parse(value: &str) -> Result<Self, Error> {
        if !is_dns_label(value) {
            return Err(Error::validation(format!(
                "namespace '{}' is not a valid DNS label",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// The namespace text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dot-separated DNS name such as `tripanels.com`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DnsName(String);

impl DnsName {
    /// Validate a DNS name; a trailing dot is not accepted
    pub fn parse(value: &str) -> Result<Self, Error> {
        if value.is_empty() || value.len() > 253 || !value.split('.').all(is_dns_label) {
            return Err(Error::validation(format!(
                "'{}' is not a valid DNS name",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    /// The name text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DnsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// RFC 1123 label: lowercase alphanumerics and '-', alphanumeric at both ends
fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_DNS_LABEL_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

/// Everything the workflows need to know about one site
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteDescriptor {
    /// Tenant namespace (isolation key)
    pub namespace: TenantNamespace,
    /// Shared pod hosting the site
    pub pod_name: String,
    /// Container inside the pod that runs the web server and wp-cli
    pub container_name: String,
    /// Site identifier
    pub nickname: Nickname,
    /// Public address the DNS record points at
    pub ip: IpAddr,
}

impl SiteDescriptor {
    /// Build a descriptor from raw values, validating every identifier
    pub fn new(
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        nickname: &str,
        ip: &str,
    ) -> Result<Self, Error> {
        let namespace = TenantNamespace::parse(namespace)?;
        let nickname = Nickname::parse(nickname)?;
        if pod_name.is_empty() {
            return Err(Error::validation("podName must not be empty"));
        }
        if container_name.is_empty() {
            return Err(Error::validation("containerName must not be empty"));
        }
        let ip = ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| Error::validation(format!("ip '{}' is invalid: {}", ip, e)))?;

        let site = Self {
            namespace,
            pod_name: pod_name.to_string(),
            container_name: container_name.to_string(),
            nickname,
            ip,
        };

        if site.site_label().len() > MAX_DNS_LABEL_LEN {
            return Err(Error::validation(format!(
                "hostname label '{}' exceeds {} characters",
                site.site_label(),
                MAX_DNS_LABEL_LEN
            )));
        }
        Ok(site)
    }

    /// Build a descriptor from a MultiSite resource
    pub fn from_resource(site: &MultiSite) -> Result<Self, Error> {
        let namespace = site
            .namespace()
            .ok_or_else(|| Error::validation("MultiSite must be namespaced"))?;
        Self::new(
            &namespace,
            &site.spec.pod_name,
            &site.spec.container_name,
            &site.spec.nick_name,
            &site.spec.ip,
        )
    }

    /// `{namespace}-{nickname}`: ingress name and first hostname label
    pub fn site_label(&self) -> String {
        format!("{}-{}", self.namespace, self.nickname)
    }

    /// `{namespace}-{nickname}.{domain}`
    pub fn hostname(&self, domain: &DnsName) -> String {
        format!("{}.{}", self.site_label(), domain)
    }

    /// Name of the backend Service fronting the shared pod
    pub fn backend_service(&self) -> String {
        format!("{}-cms", self.namespace)
    }

    /// Exec target for remote commands
    pub fn pod_target(&self) -> PodTarget {
        PodTarget {
            namespace: self.namespace.to_string(),
            pod: self.pod_name.clone(),
            container: self.container_name.clone(),
        }
    }
}
