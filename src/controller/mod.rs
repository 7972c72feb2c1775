//! Controller implementations for the multisite CRDs
//!
//! Controllers follow the Kubernetes controller pattern: re-read the object,
//! act on its current state, persist the outcome.

mod multisite;

pub use multisite::{
    error_policy, reconcile, Context, KubeClient, KubeClientImpl, ERROR_REQUEUE,
};
