use std::sync::Arc;

use async_trait::async_trait;
use json_patch::PatchOperation;
use serde_json::json;

use crate::admission::{AdmissionError, ResourceHandler, WebhookOp};
use crate::crds::AzureMachinePool;
use crate::patches;
use crate::vmcapabilities::{
    AzureCapabilities, CAP_ACCELERATED_NETWORKING, CAP_PREMIUM_IO,
};

use super::{add_op, validate_immutable};

const MIN_CPUS: i64 = 4;
const MIN_MEMORY_GB: f64 = 16.0;
const PREMIUM_STORAGE: &str = "Premium_LRS";

pub struct AzureMachinePoolHandler {
    caps: Arc<AzureCapabilities>,
    location: String,
}

impl AzureMachinePoolHandler {
    pub fn new(caps: Arc<AzureCapabilities>, location: String) -> Self {
        Self { caps, location }
    }

    async fn validate_instance_type(&self, pool: &AzureMachinePool) -> Result<(), AdmissionError> {
        let vm_size = &pool.spec.template.vm_size;

        let cpus = self.caps.cpus(&self.location, vm_size).await?;
        if cpus < MIN_CPUS {
            return Err(AdmissionError::invalid(format!(
                "instance type '{vm_size}' has {cpus} CPUs, minimum is {MIN_CPUS}"
            )));
        }

        let memory = self.caps.memory_gb(&self.location, vm_size).await?;
        if memory < MIN_MEMORY_GB {
            return Err(AdmissionError::invalid(format!(
                "instance type '{vm_size}' has {memory} GB of memory, minimum is {MIN_MEMORY_GB}"
            )));
        }

        if pool.spec.template.accelerated_networking == Some(true)
            && !self.supports(vm_size, CAP_ACCELERATED_NETWORKING).await?
        {
            return Err(AdmissionError::invalid(format!(
                "instance type '{vm_size}' does not support accelerated networking"
            )));
        }

        if pool.spec.template.os_disk.managed_disk.storage_account_type == PREMIUM_STORAGE
            && !self.supports(vm_size, CAP_PREMIUM_IO).await?
        {
            return Err(AdmissionError::invalid(format!(
                "instance type '{vm_size}' does not support premium storage"
            )));
        }

        Ok(())
    }

    async fn supports(&self, vm_size: &str, capability: &str) -> Result<bool, AdmissionError> {
        Ok(self
            .caps
            .has_capability(&self.location, vm_size, capability)
            .await?
            .unwrap_or(false))
    }
}

#[async_trait]
impl ResourceHandler for AzureMachinePoolHandler {
    type Object = AzureMachinePool;

    fn resource(&self) -> &'static str {
        "azuremachinepool"
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
        let mut adjusted = obj.clone();
        let mut ops = Vec::new();

        if adjusted.spec.location.is_empty() {
            adjusted.spec.location = self.location.clone();
            ops.push(add_op(&["spec", "location"], json!(self.location)));
        }

        let defaulted = adjusted.defaulted();
        ops.extend(patches::diff(&adjusted, &defaulted)?);
        patches::sort_ops(&mut ops);
        Ok(ops)
    }

    async fn on_create_validate(&self, obj: &Self::Object) -> Result<(), AdmissionError> {
        if obj.spec.location != self.location {
            return Err(AdmissionError::invalid(format!(
                "invalid location '{}': this installation runs in '{}'",
                obj.spec.location, self.location
            )));
        }
        self.validate_instance_type(obj).await
    }

    async fn on_update_validate(
        &self,
        old: &Self::Object,
        new: &Self::Object,
    ) -> Result<(), AdmissionError> {
        validate_immutable("spec.location", &old.spec.location, &new.spec.location)?;
        validate_immutable(
            "spec.template.osDisk.managedDisk.storageAccountType",
            &old.spec.template.os_disk.managed_disk.storage_account_type,
            &new.spec.template.os_disk.managed_disk.storage_account_type,
        )?;

        // Accelerated networking can only change together with the instance
        // type; toggling it on an unchanged VM size would force a reimage.
        if old.spec.template.vm_size == new.spec.template.vm_size {
            validate_immutable(
                "spec.template.acceleratedNetworking",
                &old.spec.template.accelerated_networking,
                &new.spec.template.accelerated_networking,
            )?;
        } else {
            self.validate_instance_type(new).await?;
        }

        Ok(())
    }
}
