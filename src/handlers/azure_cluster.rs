use std::sync::Arc;

use async_trait::async_trait;
use json_patch::PatchOperation;
use kube::Resource as _;
use serde_json::json;

use crate::admission::{AdmissionError, ResourceHandler, WebhookOp};
use crate::crds::AzureCluster;
use crate::lookup::ManagementApi;
use crate::patches;

use super::{add_op, validate_immutable, validate_organization_exists};

/// The control-plane endpoint and location of an AzureCluster are derived
/// from the installation; this handler defaults them on create and pins them
/// afterwards.
pub struct AzureClusterHandler {
    api: Arc<dyn ManagementApi>,
    base_domain: String,
    location: String,
}

impl AzureClusterHandler {
    pub fn new(api: Arc<dyn ManagementApi>, base_domain: String, location: String) -> Self {
        Self {
            api,
            base_domain,
            location,
        }
    }

    fn expected_host(&self, name: &str) -> String {
        format!("api.{name}.{}", self.base_domain)
    }
}

#[async_trait]
impl ResourceHandler for AzureClusterHandler {
    type Object = AzureCluster;

    fn resource(&self) -> &'static str {
        "azurecluster"
    }

    fn operations(&self) -> &'static [WebhookOp] {
        &[
            WebhookOp::MutateCreate,
            WebhookOp::ValidateCreate,
            WebhookOp::ValidateUpdate,
        ]
    }

    async fn on_create_mutate(
        &self,
        obj: &Self::Object,
    ) -> Result<Vec<PatchOperation>, AdmissionError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut adjusted = obj.clone();
        let mut ops = Vec::new();

        if adjusted.spec.control_plane_endpoint.host.is_empty() {
            let host = self.expected_host(&name);
            adjusted.spec.control_plane_endpoint.host = host.clone();
            ops.push(add_op(
                &["spec", "controlPlaneEndpoint", "host"],
                json!(host),
            ));
        }
        if adjusted.spec.control_plane_endpoint.port == 0 {
            adjusted.spec.control_plane_endpoint.port = 443;
            ops.push(add_op(&["spec", "controlPlaneEndpoint", "port"], json!(443)));
        }
        if adjusted.spec.location.is_empty() {
            adjusted.spec.location = self.location.clone();
            ops.push(add_op(&["spec", "location"], json!(self.location)));
        }

        // Surface any structural default not special-cased above, except the
        // network spec, which the infrastructure controller owns.
        let defaulted = adjusted.defaulted();
        ops.extend(patches::skip_for_path(
            "/spec/networkSpec",
            patches::diff(&adjusted, &defaulted)?,
        ));
        patches::sort_ops(&mut ops);
        Ok(ops)
    }

    async fn on_create_validate(&self, obj: &Self::Object) -> Result<(), AdmissionError> {
        let name = obj.meta().name.clone().unwrap_or_default();

        let expected = self.expected_host(&name);
        if obj.spec.control_plane_endpoint.host != expected {
            return Err(AdmissionError::invalid(format!(
                "invalid control-plane-endpoint host '{}': expected '{expected}'",
                obj.spec.control_plane_endpoint.host
            )));
        }
        if obj.spec.control_plane_endpoint.port != 443 {
            return Err(AdmissionError::invalid(format!(
                "invalid control-plane-endpoint port {}: expected 443",
                obj.spec.control_plane_endpoint.port
            )));
        }
        if obj.spec.location != self.location {
            return Err(AdmissionError::invalid(format!(
                "invalid location '{}': this installation runs in '{}'",
                obj.spec.location, self.location
            )));
        }

        validate_organization_exists(self.api.as_ref(), obj.meta()).await
    }

    async fn on_update_validate(
        &self,
        old: &Self::Object,
        new: &Self::Object,
    ) -> Result<(), AdmissionError> {
        validate_immutable(
            "spec.controlPlaneEndpoint",
            &old.spec.control_plane_endpoint,
            &new.spec.control_plane_endpoint,
        )?;
        validate_immutable("spec.location", &old.spec.location, &new.spec.location)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::crds::{
        ApiEndpoint, AzureClusterSpec, Organization, OrganizationSpec, ORGANIZATION_LABEL,
    };
    use crate::lookup::fake::FakeManagementApi;

    const BASE_DOMAIN: &str = "ghost.westeurope.azure.example.io";

    fn handler() -> AzureClusterHandler {
        let api = FakeManagementApi::default()
            .with_organization(Organization::new("giantswarm", OrganizationSpec::default()));
        AzureClusterHandler::new(
            Arc::new(api),
            BASE_DOMAIN.to_string(),
            "westeurope".to_string(),
        )
    }

    fn cluster(spec: AzureClusterSpec) -> AzureCluster {
        let mut cluster = AzureCluster::new("ab12c", spec);
        cluster.metadata.namespace = Some("org-giantswarm".to_string());
        cluster.metadata.labels = Some(BTreeMap::from([(
            ORGANIZATION_LABEL.to_string(),
            "giantswarm".to_string(),
        )]));
        cluster
    }

    fn valid_spec() -> AzureClusterSpec {
        AzureClusterSpec {
            location: "westeurope".to_string(),
            control_plane_endpoint: ApiEndpoint {
                host: format!("api.ab12c.{BASE_DOMAIN}"),
                port: 443,
            },
            network_spec: None,
        }
    }

    #[tokio::test]
    async fn test_mutate_create_defaults_endpoint_and_location() {
        let obj = cluster(AzureClusterSpec::default());
        let ops = handler().on_create_mutate(&obj).await.unwrap();

        let rendered = serde_json::to_value(&ops).unwrap();
        assert_eq!(
            rendered,
            serde_json::json!([
                {
                    "op": "add",
                    "path": "/spec/controlPlaneEndpoint/host",
                    "value": format!("api.ab12c.{BASE_DOMAIN}"),
                },
                { "op": "add", "path": "/spec/controlPlaneEndpoint/port", "value": 443 },
                { "op": "add", "path": "/spec/location", "value": "westeurope" },
            ])
        );
    }

    #[tokio::test]
    async fn test_mutate_create_is_empty_for_fully_specified_cluster() {
        let mut obj = cluster(valid_spec());
        obj.spec.network_spec = Some(serde_json::json!({ "subnets": [] }));
        let ops = handler().on_create_mutate(&obj).await.unwrap();
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn test_mutate_create_suppresses_network_spec_defaulting() {
        let obj = cluster(valid_spec());
        // defaulted() would add /spec/networkSpec; that sub-tree is owned by
        // the infrastructure controller and must not be patched here.
        let ops = handler().on_create_mutate(&obj).await.unwrap();
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn test_validate_create_accepts_valid_cluster() {
        let obj = cluster(valid_spec());
        assert!(handler().on_create_validate(&obj).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_create_rejects_foreign_host() {
        let mut spec = valid_spec();
        spec.control_plane_endpoint.host = "api.evil.example.com".to_string();
        let err = handler()
            .on_create_validate(&cluster(spec))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid control-plane-endpoint host"));
    }

    #[tokio::test]
    async fn test_validate_create_rejects_wrong_port() {
        let mut spec = valid_spec();
        spec.control_plane_endpoint.port = 6443;
        let err = handler()
            .on_create_validate(&cluster(spec))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[tokio::test]
    async fn test_validate_create_rejects_wrong_location() {
        let mut spec = valid_spec();
        spec.location = "eastus".to_string();
        let err = handler()
            .on_create_validate(&cluster(spec))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("location"));
    }

    #[tokio::test]
    async fn test_validate_create_rejects_unknown_organization() {
        let api = FakeManagementApi::default();
        let handler = AzureClusterHandler::new(
            Arc::new(api),
            BASE_DOMAIN.to_string(),
            "westeurope".to_string(),
        );
        let err = handler
            .on_create_validate(&cluster(valid_spec()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("organization"));
    }

    #[tokio::test]
    async fn test_validate_update_rejects_endpoint_and_location_changes() {
        let old = cluster(valid_spec());

        let mut new = old.clone();
        new.spec.control_plane_endpoint.port = 6443;
        assert!(handler().on_update_validate(&old, &new).await.is_err());

        let mut new = old.clone();
        new.spec.location = "eastus".to_string();
        assert!(handler().on_update_validate(&old, &new).await.is_err());

        let new = old.clone();
        assert!(handler().on_update_validate(&old, &new).await.is_ok());
    }
}
