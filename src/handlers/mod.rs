pub mod azure_cluster;
pub mod azure_machine_pool;
pub mod machine_pool;

use std::fmt::Debug;

use json_patch::jsonptr::PointerBuf;
use json_patch::{AddOperation, PatchOperation};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::admission::AdmissionError;
use crate::crds::{Cluster, CLUSTER_ID_LABEL, CLUSTER_NAME_LABEL, ORGANIZATION_LABEL};
use crate::lookup::ManagementApi;

pub(crate) fn add_op(segments: &[&str], value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(segments.iter().copied()),
        value,
    })
}

/// Rejects any change to a field the webhook declares immutable.
pub(crate) fn validate_immutable<T: PartialEq + Debug>(
    field: &str,
    old: &T,
    new: &T,
) -> Result<(), AdmissionError> {
    if old != new {
        return Err(AdmissionError::invalid(format!(
            "field '{field}' is immutable: cannot change {old:?} to {new:?}"
        )));
    }
    Ok(())
}

pub(crate) fn organization_label(meta: &ObjectMeta) -> Option<String> {
    meta.labels
        .as_ref()
        .and_then(|l| l.get(ORGANIZATION_LABEL))
        .cloned()
}

/// The organization label must name an existing Organization resource.
pub(crate) async fn validate_organization_exists(
    api: &dyn ManagementApi,
    meta: &ObjectMeta,
) -> Result<(), AdmissionError> {
    let Some(org) = organization_label(meta) else {
        return Err(AdmissionError::invalid(format!(
            "missing '{ORGANIZATION_LABEL}' label"
        )));
    };
    match api.organization(&org).await? {
        Some(_) => Ok(()),
        None => Err(AdmissionError::invalid(format!(
            "organization '{org}' does not exist"
        ))),
    }
}

/// Owner Cluster of a node pool, located by the CAPI cluster-name label
/// first, then the legacy cluster-id label.
pub(crate) async fn owner_cluster(
    api: &dyn ManagementApi,
    meta: &ObjectMeta,
) -> Result<Option<Cluster>, AdmissionError> {
    let labels = meta.labels.clone().unwrap_or_default();
    let Some(owner) = labels
        .get(CLUSTER_NAME_LABEL)
        .or_else(|| labels.get(CLUSTER_ID_LABEL))
    else {
        return Ok(None);
    };
    let namespace = meta.namespace.as_deref().unwrap_or("default");
    Ok(api.cluster(namespace, owner).await?)
}
