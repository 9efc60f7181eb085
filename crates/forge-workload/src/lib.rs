//! Workload controller for forge
//!
//! Turns every generation of a Workload into exactly one pipeline run,
//! mirrors the latest run back into the Workload's status, and keeps the
//! namespace's ingress routes in place while the Workload exists.

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod controller;
pub mod pipeline;
pub mod status;

pub use client::{RunCreation, WorkloadKubeClient, WorkloadKubeClientImpl};
pub use config::WorkloadConfig;
pub use controller::{error_policy, reconcile, Context, ContextBuilder};
