use std::sync::Arc;

use async_trait::async_trait;
use kube::Resource as _;

use crate::admission::{AdmissionError, ResourceHandler, WebhookOp};
use crate::crds::MachinePool;
use crate::lookup::ManagementApi;
use crate::vmcapabilities::AzureCapabilities;

use super::{organization_label, owner_cluster};

/// Cross-checks a CAPI MachinePool against its AzureMachinePool counterpart
/// (same namespace and name) and its owning Cluster.
pub struct MachinePoolHandler {
    api: Arc<dyn ManagementApi>,
    caps: Arc<AzureCapabilities>,
    location: String,
}

impl MachinePoolHandler {
    pub fn new(api: Arc<dyn ManagementApi>, caps: Arc<AzureCapabilities>, location: String) -> Self {
        Self {
            api,
            caps,
            location,
        }
    }

    async fn validate(&self, obj: &MachinePool) -> Result<(), AdmissionError> {
        self.validate_organization(obj).await?;
        self.validate_failure_domains(obj).await
    }

    async fn validate_organization(&self, obj: &MachinePool) -> Result<(), AdmissionError> {
        let Some(org) = organization_label(obj.meta()) else {
            return Err(AdmissionError::invalid("missing organization label"));
        };
        let Some(cluster) = owner_cluster(self.api.as_ref(), obj.meta()).await? else {
            return Err(AdmissionError::invalid("owner cluster not found"));
        };
        let cluster_org = organization_label(&cluster.metadata);
        if cluster_org.as_deref() != Some(org.as_str()) {
            return Err(AdmissionError::invalid(format!(
                "organization '{org}' does not match the owning cluster's '{}'",
                cluster_org.unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn validate_failure_domains(&self, obj: &MachinePool) -> Result<(), AdmissionError> {
        if obj.spec.failure_domains.is_empty() {
            return Ok(());
        }

        let name = obj.meta().name.clone().unwrap_or_default();
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let Some(amp) = self.api.azure_machine_pool(&namespace, &name).await? else {
            return Err(AdmissionError::invalid(format!(
                "AzureMachinePool '{namespace}/{name}' not found"
            )));
        };

        let vm_size = amp.spec.template.vm_size.clone();
        let location = if amp.spec.location.is_empty() {
            self.location.clone()
        } else {
            amp.spec.location.clone()
        };

        let zones = self.caps.supported_azs(&location, &vm_size).await?;
        for domain in &obj.spec.failure_domains {
            if !zones.contains(domain) {
                return Err(AdmissionError::invalid(format!(
                    "unsupported failure domain '{domain}': instance type '{vm_size}' \
                     supports zones {zones:?} in '{location}'"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceHandler for MachinePoolHandler {
    type Object = MachinePool;

    fn resource(&self) -> &'static str {
        "machinepool"
    }

    fn operations(&self) -> &'static [WebhookOp] {
        &[WebhookOp::ValidateCreate, WebhookOp::ValidateUpdate]
    }

    async fn on_create_validate(&self, obj: &Self::Object) -> Result<(), AdmissionError> {
        self.validate(obj).await
    }

    async fn on_update_validate(
        &self,
        _old: &Self::Object,
        new: &Self::Object,
    ) -> Result<(), AdmissionError> {
        self.validate(new).await
    }
}
