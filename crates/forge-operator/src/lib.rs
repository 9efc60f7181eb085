//! forge operator - wires the Workload and Namespace controllers together

#![deny(missing_docs)]

/// Command line and environment configuration
pub mod config;
/// Controller future construction
pub mod controller_runner;
/// Startup utilities (CRD install)
pub mod startup;
