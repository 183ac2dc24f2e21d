use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use semver::Version;
use thiserror::Error;
use tracing::debug;

use crate::crds::{CLUSTER_ID_LABEL, CLUSTER_NAME_LABEL, RELEASE_VERSION_LABEL};
use crate::lookup::{LookupError, ManagementApi};

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("unparsable release version '{version}': {source}")]
    InvalidVersion {
        version: String,
        source: semver::Error,
    },
    #[error("release '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// First release whose clusters are reconciled by CAPI-native controllers.
/// Anything below it still needs this webhook's business rules.
fn first_capi_release() -> Version {
    Version::new(20, 0, 0)
}

/// Legacy iff the version sorts below the first CAPI release. Unparsable
/// versions are a hard error; scope is never guessed.
pub fn is_legacy(version: &str) -> Result<bool, ReleaseError> {
    let parsed = Version::parse(version.trim_start_matches('v')).map_err(|source| {
        ReleaseError::InvalidVersion {
            version: version.to_string(),
            source,
        }
    })?;
    Ok(parsed < first_capi_release())
}

/// Release resources are named with a `v` prefix; labels carry the bare
/// version.
fn release_resource_name(version: &str) -> String {
    format!("v{}", version.trim_start_matches('v'))
}

/// Decides whether a CR is in scope for this webhook at all.
pub struct ReleaseFilter {
    api: Arc<dyn ManagementApi>,
}

impl ReleaseFilter {
    pub fn new(api: Arc<dyn ManagementApi>) -> Self {
        Self { api }
    }

    /// In scope iff the CR (or its owner Cluster) resolves to a legacy
    /// release. No resolvable release means not applicable, not an error.
    pub async fn is_applicable(&self, meta: &ObjectMeta) -> Result<bool, ReleaseError> {
        let Some(version) = self.resolve_version(meta).await? else {
            debug!(
                name = meta.name.as_deref().unwrap_or(""),
                "no resolvable release, not applicable"
            );
            return Ok(false);
        };

        if !is_legacy(&version)? {
            return Ok(false);
        }

        // Legacy classification must be backed by an actual Release resource;
        // a dangling label is a domain error, not "no label".
        let name = release_resource_name(&version);
        match self.api.release(&name).await? {
            Some(_) => Ok(true),
            None => Err(ReleaseError::NotFound(name)),
        }
    }

    /// Release label of the CR itself, else of its owner Cluster located via
    /// the CAPI cluster-name label first, then the legacy cluster-id label.
    async fn resolve_version(&self, meta: &ObjectMeta) -> Result<Option<String>, ReleaseError> {
        let labels = meta.labels.clone().unwrap_or_default();
        if let Some(version) = labels.get(RELEASE_VERSION_LABEL) {
            return Ok(Some(version.clone()));
        }

        let Some(owner) = labels
            .get(CLUSTER_NAME_LABEL)
            .or_else(|| labels.get(CLUSTER_ID_LABEL))
        else {
            return Ok(None);
        };

        let namespace = meta.namespace.as_deref().unwrap_or("default");
        let Some(cluster) = self.api.cluster(namespace, owner).await? else {
            return Ok(None);
        };

        Ok(cluster
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(RELEASE_VERSION_LABEL))
            .cloned())
    }
}
