use async_trait::async_trait;
use kube::{Api, Client};
use thiserror::Error;

use crate::crds::{AzureMachinePool, Cluster, Organization, Release};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("management API lookup failed: {0}")]
    Kube(#[from] kube::Error),
}

/// Read-only view of the management cluster consumed by the release filter
/// and the handlers. Injected so tests can substitute an in-memory fake.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, LookupError>;

    async fn release(&self, name: &str) -> Result<Option<Release>, LookupError>;

    async fn organization(&self, name: &str) -> Result<Option<Organization>, LookupError>;

    async fn azure_machine_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureMachinePool>, LookupError>;
}

/// Production implementation over the in-cluster client.
pub struct KubeManagementApi {
    client: Client,
}

impl KubeManagementApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManagementApi for KubeManagementApi {
    async fn cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, LookupError> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn release(&self, name: &str) -> Result<Option<Release>, LookupError> {
        let api: Api<Release> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn organization(&self, name: &str) -> Result<Option<Organization>, LookupError> {
        let api: Api<Organization> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn azure_machine_pool(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AzureMachinePool>, LookupError> {
        let api: Api<AzureMachinePool> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
