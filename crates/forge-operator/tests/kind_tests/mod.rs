//! Integration tests for the forge operator
//!
//! Tests are organized by the story they tell:
//!
//! - `crd_operations`: creating, reading and deleting Workloads through the
//!   Kubernetes API with only the CRD installed
//!
//! - `workload_lifecycle`: what a running operator does to a new Workload.
//!   These need the operator deployed in the cluster.

mod crd_operations;
mod helpers;
mod workload_lifecycle;
