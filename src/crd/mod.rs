//! Custom Resource Definitions for the multisite operator

mod multisite;

pub use multisite::{MultiSite, MultiSiteSpec, SiteStatus, MULTISITE_FINALIZER};
