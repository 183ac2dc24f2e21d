use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use json_patch::{Patch, PatchOperation};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use kube::Resource as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::lookup::LookupError;
use crate::metrics::WardenMetrics;
use crate::patches::PatchError;
use crate::release::{ReleaseError, ReleaseFilter};
use crate::vmcapabilities::SkuError;

/// The four webhook operations a handler may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookOp {
    MutateCreate,
    MutateUpdate,
    ValidateCreate,
    ValidateUpdate,
}

impl WebhookOp {
    pub fn webhook(self) -> &'static str {
        match self {
            WebhookOp::MutateCreate | WebhookOp::MutateUpdate => "mutate",
            WebhookOp::ValidateCreate | WebhookOp::ValidateUpdate => "validate",
        }
    }

    pub fn operation(self) -> &'static str {
        match self {
            WebhookOp::MutateCreate | WebhookOp::ValidateCreate => "create",
            WebhookOp::MutateUpdate | WebhookOp::ValidateUpdate => "update",
        }
    }

    fn is_update(self) -> bool {
        matches!(self, WebhookOp::MutateUpdate | WebhookOp::ValidateUpdate)
    }
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("failed to decode {kind}: {source}")]
    Decode {
        kind: &'static str,
        source: serde_json::Error,
    },
    #[error("operation {operation} is not supported for {resource}")]
    NotSupported {
        resource: &'static str,
        operation: &'static str,
    },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Sku(#[from] SkuError),
    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl AdmissionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AdmissionError::Invalid(message.into())
    }
}

/// One handler per CR kind. Handlers declare the operations they support;
/// the dispatcher mounts only those routes, so hitting a default method is a
/// wiring bug and rejects loudly.
#[async_trait]
pub trait ResourceHandler: Send + Sync + 'static {
    type Object: kube::Resource<DynamicType = ()>
        + DeserializeOwned
        + Serialize
        + Clone
        + Send
        + Sync;

    /// Path segment under /validate and /mutate.
    fn resource(&self) -> &'static str;

    fn operations(&self) -> &'static [WebhookOp];

    async fn on_create_mutate(
        &self,
        _obj: &Self::Object,
    ) -> Result<Vec<PatchOperation>, AdmissionError> {
        Err(AdmissionError::NotSupported {
            resource: self.resource(),
            operation: "create-mutate",
        })
    }

    async fn on_update_mutate(
        &self,
        _old: &Self::Object,
        _new: &Self::Object,
    ) -> Result<Vec<PatchOperation>, AdmissionError> {
        Err(AdmissionError::NotSupported {
            resource: self.resource(),
            operation: "update-mutate",
        })
    }

    async fn on_create_validate(&self, _obj: &Self::Object) -> Result<(), AdmissionError> {
        Err(AdmissionError::NotSupported {
            resource: self.resource(),
            operation: "create-validate",
        })
    }

    async fn on_update_validate(
        &self,
        _old: &Self::Object,
        _new: &Self::Object,
    ) -> Result<(), AdmissionError> {
        Err(AdmissionError::NotSupported {
            resource: self.resource(),
            operation: "update-validate",
        })
    }
}

/// Per-route state: the handler plus the shared collaborators, bound to one
/// concrete webhook operation at registration time.
pub struct RouteState<H> {
    pub handler: Arc<H>,
    pub filter: Arc<ReleaseFilter>,
    pub metrics: Arc<WardenMetrics>,
    pub op: WebhookOp,
}

impl<H> Clone for RouteState<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            filter: self.filter.clone(),
            metrics: self.metrics.clone(),
            op: self.op,
        }
    }
}

/// Raw JSON of the embedded object into the handler's typed CR.
pub fn decode<T: DeserializeOwned>(
    kind: &'static str,
    obj: &DynamicObject,
) -> Result<T, AdmissionError> {
    let value =
        serde_json::to_value(obj).map_err(|source| AdmissionError::Decode { kind, source })?;
    serde_json::from_value(value).map_err(|source| AdmissionError::Decode { kind, source })
}

/// The generic pipeline every route runs: content-type gate, envelope
/// decode, typed decode, dry-run short-circuit, applicability filter,
/// handler invocation, response encoding.
pub async fn handle<H: ResourceHandler>(
    axum::extract::State(state): axum::extract::State<RouteState<H>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    if !is_json(&headers) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(resource = state.handler.resource(), "malformed AdmissionReview: {e}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(r) => r,
        Err(e) => {
            warn!(resource = state.handler.resource(), "AdmissionReview missing request: {e}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    state.metrics.record_request(
        state.handler.resource(),
        state.op.operation(),
        state.op.webhook(),
    );

    let response = run_pipeline(&state, &req).await;

    state
        .metrics
        .record_response(response.allowed, state.op.webhook(), start.elapsed());

    encode_review(response.into_review())
}

async fn run_pipeline<H: ResourceHandler>(
    state: &RouteState<H>,
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    match evaluate(state, req).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(
                resource = state.handler.resource(),
                uid = %req.uid,
                "rejected: {e}"
            );
            AdmissionResponse::from(req).deny(e.to_string())
        }
    }
}

async fn evaluate<H: ResourceHandler>(
    state: &RouteState<H>,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<AdmissionResponse, AdmissionError> {
    let resp = AdmissionResponse::from(req);

    let raw = req
        .object
        .as_ref()
        .ok_or_else(|| AdmissionError::invalid("request carries no object"))?;
    let obj: H::Object = decode(state.handler.resource(), raw)?;

    let old: Option<H::Object> = if state.op.is_update() {
        let raw_old = req
            .old_object
            .as_ref()
            .ok_or_else(|| AdmissionError::invalid("update request carries no oldObject"))?;
        Some(decode(state.handler.resource(), raw_old)?)
    } else {
        None
    };

    // Dry runs validate request shape only; no business logic, no lookups.
    if req.dry_run {
        return Ok(resp);
    }

    if !state.filter.is_applicable(obj.meta()).await? {
        return Ok(resp);
    }

    match state.op {
        WebhookOp::MutateCreate => {
            let ops = state.handler.on_create_mutate(&obj).await?;
            with_patches(resp, ops)
        }
        WebhookOp::MutateUpdate => {
            let old = old.as_ref().ok_or_else(|| {
                AdmissionError::invalid("update request carries no oldObject")
            })?;
            let ops = state.handler.on_update_mutate(old, &obj).await?;
            with_patches(resp, ops)
        }
        WebhookOp::ValidateCreate => {
            state.handler.on_create_validate(&obj).await?;
            Ok(resp)
        }
        WebhookOp::ValidateUpdate => {
            let old = old.as_ref().ok_or_else(|| {
                AdmissionError::invalid("update request carries no oldObject")
            })?;
            state.handler.on_update_validate(old, &obj).await?;
            Ok(resp)
        }
    }
}

fn with_patches(
    resp: AdmissionResponse,
    ops: Vec<PatchOperation>,
) -> Result<AdmissionResponse, AdmissionError> {
    if ops.is_empty() {
        return Ok(resp);
    }
    resp.with_patch(Patch(ops))
        .map_err(|e| AdmissionError::invalid(format!("failed to serialize patch: {e}")))
}

fn encode_review(review: AdmissionReview<DynamicObject>) -> Response {
    match serde_json::to_value(&review) {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            error!("failed to serialize AdmissionReview response: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.eq_ignore_ascii_case("application/json")
                || v.to_ascii_lowercase().starts_with("application/json;")
        })
}

#[cfg(test)]
mod tests {
    use axum::extract::State;
    use serde_json::{json, Value};

    use super::*;
    use crate::crds::{
        AzureCluster, Release, ReleaseSpec, RELEASE_VERSION_LABEL,
    };
    use crate::lookup::fake::FakeManagementApi;
    use crate::metrics::WardenMetrics;

    struct EchoHandler;

    #[async_trait]
    impl ResourceHandler for EchoHandler {
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
            _obj: &Self::Object,
        ) -> Result<Vec<PatchOperation>, AdmissionError> {
            Ok(vec![PatchOperation::Add(json_patch::AddOperation {
                path: json_patch::jsonptr::PointerBuf::parse("/spec/location").unwrap(),
                value: json!("westeurope"),
            })])
        }

        async fn on_create_validate(&self, obj: &Self::Object) -> Result<(), AdmissionError> {
            if obj.spec.location.is_empty() {
                return Err(AdmissionError::invalid("location must not be empty"));
            }
            Ok(())
        }

        async fn on_update_validate(
            &self,
            old: &Self::Object,
            new: &Self::Object,
        ) -> Result<(), AdmissionError> {
            if old.spec.location != new.spec.location {
                return Err(AdmissionError::invalid("location is immutable"));
            }
            Ok(())
        }
    }

    fn state(op: WebhookOp) -> RouteState<EchoHandler> {
        let api = FakeManagementApi::default()
            .with_release(Release::new("v14.1.0", ReleaseSpec::default()));
        let mut registry = prometheus_client::registry::Registry::default();
        RouteState {
            handler: Arc::new(EchoHandler),
            filter: Arc::new(ReleaseFilter::new(Arc::new(api))),
            metrics: Arc::new(WardenMetrics::new(&mut registry)),
            op,
        }
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers
    }

    fn cluster_object(labels: &[(&str, &str)], location: &str) -> Value {
        json!({
            "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
            "kind": "AzureCluster",
            "metadata": {
                "name": "ab12c",
                "namespace": "org-giantswarm",
                "labels": labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                    .collect::<serde_json::Map<_, _>>(),
            },
            "spec": { "location": location }
        })
    }

    fn review(operation: &str, object: Value, old_object: Option<Value>, dry_run: bool) -> Bytes {
        let mut request = json!({
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": { "group": "infrastructure.cluster.x-k8s.io", "version": "v1beta1", "kind": "AzureCluster" },
            "resource": { "group": "infrastructure.cluster.x-k8s.io", "version": "v1beta1", "resource": "azureclusters" },
            "operation": operation,
            "name": "ab12c",
            "namespace": "org-giantswarm",
            "userInfo": {},
            "object": object,
            "dryRun": dry_run,
        });
        if let Some(old) = old_object {
            request["oldObject"] = old;
        }
        Bytes::from(
            serde_json::to_vec(&json!({
                "apiVersion": "admission.k8s.io/v1",
                "kind": "AdmissionReview",
                "request": request,
            }))
            .unwrap(),
        )
    }

    async fn response_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    const LEGACY: &[(&str, &str)] = &[(RELEASE_VERSION_LABEL, "14.1.0")];

    #[tokio::test]
    async fn test_non_json_content_type_is_bad_request() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        let response = handle(
            State(state(WebhookOp::ValidateCreate)),
            headers,
            review("CREATE", cluster_object(LEGACY, "westeurope"), None, false),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_bad_request() {
        let response = handle(
            State(state(WebhookOp::ValidateCreate)),
            json_headers(),
            Bytes::from_static(b"{\"not\": \"an admission review\""),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dry_run_short_circuits_allowed_without_patch() {
        let response = handle(
            State(state(WebhookOp::MutateCreate)),
            json_headers(),
            review("CREATE", cluster_object(LEGACY, ""), None, true),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["response"]["allowed"], json!(true));
        assert!(body["response"].get("patch").is_none());
    }

    #[tokio::test]
    async fn test_not_applicable_is_allowed_pass_through() {
        // No release label anywhere: invalid location would otherwise reject.
        let response = handle(
            State(state(WebhookOp::ValidateCreate)),
            json_headers(),
            review("CREATE", cluster_object(&[], ""), None, false),
        )
        .await;
        let body = response_json(response).await;
        assert_eq!(body["response"]["allowed"], json!(true));
    }

    #[tokio::test]
    async fn test_validation_error_becomes_rejection_with_message() {
        let response = handle(
            State(state(WebhookOp::ValidateCreate)),
            json_headers(),
            review("CREATE", cluster_object(LEGACY, ""), None, false),
        )
        .await;
        let body = response_json(response).await;
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(
            body["response"]["status"]["message"],
            json!("location must not be empty")
        );
    }

    #[tokio::test]
    async fn test_mutate_returns_json_patch() {
        let response = handle(
            State(state(WebhookOp::MutateCreate)),
            json_headers(),
            review("CREATE", cluster_object(LEGACY, ""), None, false),
        )
        .await;
        let body = response_json(response).await;
        assert_eq!(body["response"]["allowed"], json!(true));
        assert_eq!(body["response"]["patchType"], json!("JSONPatch"));

        let resp: AdmissionResponse = serde_json::from_value(body["response"].clone()).unwrap();
        let patch: Value = serde_json::from_slice(resp.patch.as_deref().unwrap()).unwrap();
        assert_eq!(
            patch,
            json!([{ "op": "add", "path": "/spec/location", "value": "westeurope" }])
        );
    }

    #[tokio::test]
    async fn test_update_without_old_object_is_rejected() {
        let response = handle(
            State(state(WebhookOp::ValidateUpdate)),
            json_headers(),
            review("UPDATE", cluster_object(LEGACY, "westeurope"), None, false),
        )
        .await;
        let body = response_json(response).await;
        assert_eq!(body["response"]["allowed"], json!(false));
    }

    #[tokio::test]
    async fn test_immutable_field_change_rejected_on_update() {
        let response = handle(
            State(state(WebhookOp::ValidateUpdate)),
            json_headers(),
            review(
                "UPDATE",
                cluster_object(LEGACY, "eastus"),
                Some(cluster_object(LEGACY, "westeurope")),
                false,
            ),
        )
        .await;
        let body = response_json(response).await;
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(
            body["response"]["status"]["message"],
            json!("location is immutable")
        );
    }
}
