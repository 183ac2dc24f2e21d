use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::vmcapabilities::{SkuError, SkuLister, VmSku};

const ARM_ENDPOINT: &str = "https://management.azure.com";
const SKUS_API_VERSION: &str = "2021-07-01";

/// Resource-SKU listing against the Azure Resource Manager API. The bearer
/// token is read from a file on every call; rotation is handled by whoever
/// projects the file (workload identity, sidecar).
pub struct ArmSkuLister {
    client: reqwest::Client,
    subscription_id: String,
    token_file: String,
}

impl ArmSkuLister {
    pub fn new(subscription_id: String, token_file: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            subscription_id,
            token_file,
        }
    }

    async fn bearer_token(&self, location: &str) -> Result<String, SkuError> {
        let token = tokio::fs::read_to_string(&self.token_file)
            .await
            .map_err(|e| upstream(location, format!("failed to read token file: {e}")))?;
        Ok(token.trim().to_string())
    }
}

#[async_trait]
impl SkuLister for ArmSkuLister {
    async fn list(&self, location: &str) -> Result<Vec<VmSku>, SkuError> {
        let token = self.bearer_token(location).await?;
        let mut url = format!(
            "{ARM_ENDPOINT}/subscriptions/{}/providers/Microsoft.Compute/skus\
             ?api-version={SKUS_API_VERSION}&$filter=location eq '{location}'",
            self.subscription_id
        );

        let mut skus = Vec::new();
        loop {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| upstream(location, e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(upstream(location, format!("ARM returned {status}")));
            }

            let page: SkuPage = response
                .json()
                .await
                .map_err(|e| upstream(location, format!("malformed SKU listing: {e}")))?;

            skus.extend(page.value.into_iter().filter_map(|s| s.into_vm_sku(location)));

            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        debug!(location, count = skus.len(), "listed VM SKUs");
        Ok(skus)
    }
}

fn upstream(location: &str, message: String) -> SkuError {
    SkuError::Upstream {
        location: location.to_string(),
        message,
    }
}

#[derive(Deserialize)]
struct SkuPage {
    #[serde(default)]
    value: Vec<ArmSku>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct ArmSku {
    name: String,
    #[serde(rename = "resourceType")]
    resource_type: String,
    #[serde(default)]
    capabilities: Vec<ArmCapability>,
    #[serde(default, rename = "locationInfo")]
    location_info: Vec<ArmLocationInfo>,
}

#[derive(Deserialize)]
struct ArmCapability {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct ArmLocationInfo {
    location: String,
    #[serde(default)]
    zones: Vec<String>,
}

impl ArmSku {
    fn into_vm_sku(self, location: &str) -> Option<VmSku> {
        if self.resource_type != "virtualMachines" {
            return None;
        }
        let zones = self
            .location_info
            .iter()
            .find(|i| i.location.eq_ignore_ascii_case(location))
            .map(|i| i.zones.clone())
            .unwrap_or_default();
        Some(VmSku {
            name: self.name,
            capabilities: self
                .capabilities
                .into_iter()
                .map(|c| (c.name, c.value))
                .collect(),
            zones,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sku_page_parsing_filters_non_vm_resources() {
        let page: SkuPage = serde_json::from_value(serde_json::json!({
            "value": [
                {
                    "name": "Standard_D4s_v3",
                    "resourceType": "virtualMachines",
                    "capabilities": [
                        { "name": "vCPUs", "value": "4" },
                        { "name": "PremiumIO", "value": "True" }
                    ],
                    "locationInfo": [
                        { "location": "westeurope", "zones": ["1", "2", "3"] },
                        { "location": "eastus", "zones": ["1"] }
                    ]
                },
                { "name": "P30", "resourceType": "disks" }
            ],
            "nextLink": null
        }))
        .unwrap();

        let skus: Vec<VmSku> = page
            .value
            .into_iter()
            .filter_map(|s| s.into_vm_sku("westeurope"))
            .collect();
        assert_eq!(skus.len(), 1);
        assert_eq!(skus[0].name, "Standard_D4s_v3");
        assert_eq!(skus[0].capabilities.get("vCPUs").map(String::as_str), Some("4"));
        assert_eq!(skus[0].zones, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_zones_default_to_empty_for_unlisted_location() {
        let sku = ArmSku {
            name: "Standard_A2_v2".to_string(),
            resource_type: "virtualMachines".to_string(),
            capabilities: vec![],
            location_info: vec![],
        };
        assert!(sku.into_vm_sku("westeurope").unwrap().zones.is_empty());
    }
}
