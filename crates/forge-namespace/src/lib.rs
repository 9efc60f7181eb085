//! Namespace cascade cleanup for forge
//!
//! Watches namespaces carrying the forge enablement label and, once one
//! starts terminating, removes its pipeline and trigger resources and its
//! ingress routes.

#![deny(missing_docs)]

pub mod client;
pub mod controller;

pub use client::{CleanupKind, NamespaceKubeClient, NamespaceKubeClientImpl, CLEANUP_KINDS};
pub use controller::{
    cascade_cleanup, error_policy, is_enabled, reconcile, CleanupReport, Context, KindFailure,
};
