use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_tls_cert_path() -> String {
    "/certs/tls.crt".to_string()
}

fn default_tls_key_path() -> String {
    "/certs/tls.key".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_azure_token_file() -> String {
    "/var/run/secrets/azure/token".to_string()
}

/// Installation-wide settings. `base_domain` and `location` feed the
/// AzureCluster defaulting and validation rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: String,
    #[serde(default = "default_tls_key_path")]
    pub tls_key_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// DNS zone of the installation, e.g. `ghost.westeurope.azure.example.io`.
    pub base_domain: String,
    /// Azure region every workload cluster of this installation lives in.
    pub location: String,
    /// Subscription the SKU listing runs against.
    pub subscription_id: String,
    /// File holding a bearer token for the Resource Manager API; refreshed
    /// externally.
    #[serde(default = "default_azure_token_file")]
    pub azure_token_file: String,
}

impl WardenConfig {
    pub fn load(path: &str) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("AZURE_WARDEN_").split("__"))
            .extract()
            .map_err(Box::new)
    }
}
