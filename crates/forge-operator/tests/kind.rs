//! End-to-end integration tests for the forge operator
//!
//! These tests require a Kubernetes cluster to run. They are ignored by default
//! and can be run with:
//!
//! ```bash
//! cargo test -p forge-operator --test kind -- --ignored
//! ```
//!
//! The current kubeconfig context is used; point it at a disposable cluster.

mod kind_tests;
