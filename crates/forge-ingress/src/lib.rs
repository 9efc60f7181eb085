//! Ingress route management for forge
//!
//! Maintains one listener HTTPProxy per namespace and that namespace's
//! include entry in the shared global route table.

#![deny(missing_docs)]

pub mod manager;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod store;

pub use manager::{
    canonical_include, desired_listener, listener_name, merge_include, remove_include,
    RouteChange, RouteManager, RouteTableRef, DEFAULT_ROUTE_TABLE_NAME,
    DEFAULT_ROUTE_TABLE_NAMESPACE, LISTENER_BACKEND_PORT,
};
pub use store::{KubeRouteStore, RouteStore};
