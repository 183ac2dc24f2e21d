use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

pub const CAP_VCPUS: &str = "vCPUs";
pub const CAP_MEMORY_GB: &str = "MemoryGB";
pub const CAP_PREMIUM_IO: &str = "PremiumIO";
pub const CAP_ACCELERATED_NETWORKING: &str = "AcceleratedNetworkingEnabled";

/// One VM size as reported by the resource-SKU listing, reduced to the
/// capability map and the availability zones for the queried location.
#[derive(Clone, Debug, Default)]
pub struct VmSku {
    pub name: String,
    pub capabilities: HashMap<String, String>,
    pub zones: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SkuError {
    #[error("SKU '{vm_type}' not found in location '{location}'")]
    SkuNotFound { vm_type: String, location: String },
    #[error("invalid upstream response: capability '{capability}' of SKU '{vm_type}' has value '{value}'")]
    InvalidUpstream {
        vm_type: String,
        capability: String,
        value: String,
    },
    #[error("SKU '{vm_type}' reports no '{capability}' capability")]
    MissingCapability {
        vm_type: String,
        capability: String,
    },
    #[error("SKU listing for location '{location}' failed: {message}")]
    Upstream { location: String, message: String },
}

/// Remote compute-SKU listing, filtered by location. Injected so tests can
/// substitute a canned catalog.
#[async_trait]
pub trait SkuLister: Send + Sync {
    async fn list(&self, location: &str) -> Result<Vec<VmSku>, SkuError>;
}

/// Lazily populated per-location SKU catalog. Each location is fetched at
/// most once per process; entries are write-once and never evicted. The
/// per-location cell gives single-flight population without blocking lookups
/// for locations that are already filled.
pub struct AzureCapabilities {
    lister: Arc<dyn SkuLister>,
    by_location: Mutex<HashMap<String, Arc<OnceCell<HashMap<String, VmSku>>>>>,
}

impl AzureCapabilities {
    pub fn new(lister: Arc<dyn SkuLister>) -> Self {
        Self {
            lister,
            by_location: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cpus(&self, location: &str, vm_type: &str) -> Result<i64, SkuError> {
        let raw = self.numeric_capability(location, vm_type, CAP_VCPUS).await?;
        raw.parse()
            .map_err(|_| invalid_upstream(vm_type, CAP_VCPUS, &raw))
    }

    pub async fn memory_gb(&self, location: &str, vm_type: &str) -> Result<f64, SkuError> {
        let raw = self
            .numeric_capability(location, vm_type, CAP_MEMORY_GB)
            .await?;
        raw.parse()
            .map_err(|_| invalid_upstream(vm_type, CAP_MEMORY_GB, &raw))
    }

    /// `None` means the SKU exists but does not report the capability at
    /// all, as opposed to reporting it disabled.
    pub async fn has_capability(
        &self,
        location: &str,
        vm_type: &str,
        name: &str,
    ) -> Result<Option<bool>, SkuError> {
        let sku = self.sku(location, vm_type).await?;
        Ok(sku
            .capabilities
            .get(name)
            .map(|v| v.eq_ignore_ascii_case("true")))
    }

    pub async fn supported_azs(
        &self,
        location: &str,
        vm_type: &str,
    ) -> Result<Vec<String>, SkuError> {
        Ok(self.sku(location, vm_type).await?.zones)
    }

    async fn numeric_capability(
        &self,
        location: &str,
        vm_type: &str,
        name: &str,
    ) -> Result<String, SkuError> {
        let sku = self.sku(location, vm_type).await?;
        sku.capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| SkuError::MissingCapability {
                vm_type: vm_type.to_string(),
                capability: name.to_string(),
            })
    }

    async fn sku(&self, location: &str, vm_type: &str) -> Result<VmSku, SkuError> {
        let cell = {
            let mut guard = self
                .by_location
                .lock()
                .expect("sku cache mutex poisoned");
            guard.entry(location.to_string()).or_default().clone()
        };

        let catalog = cell
            .get_or_try_init(|| async {
                let skus = self.lister.list(location).await?;
                info!(location, skus = skus.len(), "populated SKU catalog");
                Ok::<_, SkuError>(index(skus))
            })
            .await?;

        catalog
            .get(vm_type)
            .cloned()
            .ok_or_else(|| SkuError::SkuNotFound {
                vm_type: vm_type.to_string(),
                location: location.to_string(),
            })
    }
}

fn invalid_upstream(vm_type: &str, capability: &str, value: &str) -> SkuError {
    SkuError::InvalidUpstream {
        vm_type: vm_type.to_string(),
        capability: capability.to_string(),
        value: value.to_string(),
    }
}

fn index(skus: Vec<VmSku>) -> HashMap<String, VmSku> {
    skus.into_iter()
        .map(|mut sku| {
            sku.zones.sort();
            sku.zones.dedup();
            (sku.name.clone(), sku)
        })
        .collect()
}
