use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Label carrying the release version of a cluster or node pool.
pub const RELEASE_VERSION_LABEL: &str = "release.giantswarm.io/version";
/// CAPI label naming the owning cluster.
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";
/// Legacy label carrying the owning cluster's id.
pub const CLUSTER_ID_LABEL: &str = "giantswarm.io/cluster";
/// Label naming the organization a resource belongs to.
pub const ORGANIZATION_LABEL: &str = "giantswarm.io/organization";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i32,
}

#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureCluster",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterSpec {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,
    /// Opaque to this webhook; owned by the infrastructure controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_spec: Option<Value>,
}

impl AzureCluster {
    /// Structural defaults, applied after the mutator's explicit field
    /// adjustments. Pure: returns the defaulted copy.
    pub fn defaulted(&self) -> Self {
        let mut out = self.clone();
        if out.spec.control_plane_endpoint.port == 0 {
            out.spec.control_plane_endpoint.port = 443;
        }
        if out.spec.network_spec.is_none() {
            out.spec.network_spec = Some(json!({ "subnets": [] }));
        }
        out
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDisk {
    #[serde(default)]
    pub storage_account_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    #[serde(default)]
    pub managed_disk: ManagedDisk,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplate {
    #[serde(default)]
    pub vm_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerated_networking: Option<bool>,
    #[serde(default)]
    pub os_disk: OsDisk,
}

#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "AzureMachinePool",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolSpec {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub template: MachineTemplate,
}

impl AzureMachinePool {
    pub fn defaulted(&self) -> Self {
        let mut out = self.clone();
        if out.spec.template.os_disk.managed_disk.storage_account_type.is_empty() {
            out.spec.template.os_disk.managed_disk.storage_account_type =
                "Standard_LRS".to_string();
        }
        out
    }
}

#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachinePool",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolSpec {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub failure_domains: Vec<String>,
    /// Infrastructure reference, opaque here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
}

#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseComponent {
    pub name: String,
    pub version: String,
}

#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize)]
#[kube(
    group = "release.giantswarm.io",
    version = "v1alpha1",
    kind = "Release",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    #[serde(default)]
    pub components: Vec<ReleaseComponent>,
}

impl Release {
    /// Version of the named component, if the release ships it.
    pub fn component_version(&self, name: &str) -> Option<&str> {
        self.spec
            .components
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.version.as_str())
    }
}

#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize)]
#[kube(
    group = "security.giantswarm.io",
    version = "v1alpha1",
    kind = "Organization",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSpec {}
