//! Multisite - CRD-driven provisioning of WordPress sites in shared tenant pods
//!
//! Each `MultiSite` object asks for one WordPress site inside a tenant's
//! shared hosting pod. The operator provisions it with a fixed sequence of
//! remote commands (site tree, database, wp-cli install, vhost), publishes it
//! through an Ingress and a DNS record, and tears it down again when the
//! object is deleted.
//!
//! # Modules
//!
//! - [`crd`] - The MultiSite Custom Resource Definition
//! - [`controller`] - Reconciliation state machine
//! - [`site`] - Validated site identity and the create/delete workflows
//! - [`exec`] - Remote command execution and exit-marker evaluation
//! - [`ingress`] - Per-site routing rule
//! - [`dns`] - Per-site DNS record
//! - [`config`] - Operator configuration
//! - [`telemetry`] - Logging setup
//! - [`retry`] - Exponential backoff for transient failures
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod dns;
pub mod error;
pub mod exec;
pub mod ingress;
pub mod retry;
pub mod site;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name the operator reports itself as
pub const OPERATOR_NAME: &str = "multisite-operator";

/// Field manager for every write to the API server
pub const FIELD_MANAGER: &str = "multisite-controller";

/// Label carrying the site nickname on generated objects
pub const SITE_LABEL_KEY: &str = "multisite.jcy.ismewen.com/site";
