//! Object store access for HTTPProxy resources

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;

use forge_common::crd::HttpProxy;
use forge_common::{Error, FIELD_MANAGER};

/// Trait abstracting HTTPProxy reads and writes
///
/// Writes go through `replace_proxy`, which carries the resourceVersion of
/// the object that was read; a concurrent writer makes it fail with a
/// conflict instead of silently overwriting.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Get a proxy, `None` if it does not exist
    async fn get_proxy(&self, namespace: &str, name: &str) -> Result<Option<HttpProxy>, Error>;

    /// Create a proxy
    async fn create_proxy(&self, proxy: &HttpProxy) -> Result<(), Error>;

    /// Replace a proxy, guarded by its resourceVersion
    async fn replace_proxy(&self, proxy: &HttpProxy) -> Result<(), Error>;

    /// Delete a proxy; returns `false` if it was already gone
    async fn delete_proxy(&self, namespace: &str, name: &str) -> Result<bool, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeRouteStore {
    client: Client,
}

impl KubeRouteStore {
    /// Create a new store wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<HttpProxy> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_and_name(proxy: &HttpProxy) -> Result<(&str, &str), Error> {
    let namespace = proxy
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::internal_with_context("route-store", "proxy has no namespace"))?;
    let name = proxy
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::internal_with_context("route-store", "proxy has no name"))?;
    Ok((namespace, name))
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl RouteStore for KubeRouteStore {
    async fn get_proxy(&self, namespace: &str, name: &str) -> Result<Option<HttpProxy>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create_proxy(&self, proxy: &HttpProxy) -> Result<(), Error> {
        let (namespace, _) = namespace_and_name(proxy)?;
        self.api(namespace).create(&post_params(), proxy).await?;
        Ok(())
    }

    async fn replace_proxy(&self, proxy: &HttpProxy) -> Result<(), Error> {
        let (namespace, name) = namespace_and_name(proxy)?;
        self.api(namespace)
            .replace(name, &post_params(), proxy)
            .await?;
        Ok(())
    }

    async fn delete_proxy(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
