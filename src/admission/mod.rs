//! # Admission
//!
//! Decides how pods are mutated on creation and serves that decision over HTTPS.
//!
//! - `handler`: `POST /mutate` endpoint speaking the AdmissionReview protocol
//! - `tls`: Server certificate resolution from the managed Secret
//!
//! Every object is allowed. Pods carrying a label under `serving.knative.dev/` get the
//! node IP injected as an environment variable into each container except the
//! `queue-proxy` sidecar. A container that already defines the variable keeps its own
//! definition.

pub mod handler;
pub mod tls;

use crate::constants::{EXCLUDED_CONTAINER, INJECT_LABEL_PREFIX, NODE_IP_ENV_VAR, NODE_IP_FIELD_PATH};
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, ConvertAdmissionReviewError};
use kube::core::DynamicObject;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("invalid method {0}, only POST requests are allowed")]
    MethodNotAllowed(String),

    #[error("unsupported content type {0:?}, only application/json is supported")]
    UnsupportedContentType(String),

    #[error("could not decode admission review: {0}")]
    InvalidBody(String),

    #[error("invalid admission review: {0}")]
    MissingRequest(#[from] ConvertAdmissionReviewError),
}

/// Answer one admission request
///
/// Always allows the object, possibly with a patch. Only a Pod that cannot be
/// decoded is denied.
pub fn mutate(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);

    if req.kind.kind != "Pod" {
        return response;
    }
    let Some(object) = req.object.as_ref() else {
        return response;
    };
    let pod: Pod = match serde_json::to_value(object).and_then(serde_json::from_value) {
        Ok(pod) => pod,
        Err(e) => return response.deny(format!("could not decode pod: {e}")),
    };

    let operations = pod_patch(&pod);
    if operations.is_empty() {
        return response;
    }
    debug!(
        pod.name = pod.metadata.name.as_deref().unwrap_or_default(),
        pod.generate_name = pod.metadata.generate_name.as_deref().unwrap_or_default(),
        operations = operations.len(),
        "Injecting node IP"
    );
    let patch = match serde_json::from_value::<json_patch::Patch>(Value::Array(operations)) {
        Ok(patch) => patch,
        Err(e) => return AdmissionResponse::from(req).deny(format!("could not build patch: {e}")),
    };
    match response.with_patch(patch) {
        Ok(response) => response,
        Err(e) => AdmissionResponse::from(req).deny(format!("could not serialize patch: {e}")),
    }
}

/// Whether `pod` carries a label that opts it into injection
pub fn should_inject(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.keys().any(|key| key.starts_with(INJECT_LABEL_PREFIX)))
}

/// JSON patch operations injecting the node IP into `pod`
///
/// Empty when nothing has to change.
pub fn pod_patch(pod: &Pod) -> Vec<Value> {
    if !should_inject(pod) {
        return Vec::new();
    }
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };

    let env_var = node_ip_env_var();
    let mut operations = Vec::new();
    for (index, container) in spec.containers.iter().enumerate() {
        if container.name == EXCLUDED_CONTAINER {
            continue;
        }
        match container.env.as_ref() {
            None => operations.push(json!({
                "op": "add",
                "path": format!("/spec/containers/{index}/env"),
                "value": [env_var.clone()],
            })),
            Some(env) if env.iter().any(|var| var.name == NODE_IP_ENV_VAR) => {
                warn!(
                    container = %container.name,
                    "Container already defines {}, keeping its value", NODE_IP_ENV_VAR
                );
            }
            Some(_) => operations.push(json!({
                "op": "add",
                "path": format!("/spec/containers/{index}/env/-"),
                "value": env_var.clone(),
            })),
        }
    }
    operations
}

fn node_ip_env_var() -> Value {
    json!({
        "name": NODE_IP_ENV_VAR,
        "valueFrom": {
            "fieldRef": {
                "fieldPath": NODE_IP_FIELD_PATH,
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::admission::AdmissionReview;

    fn review(object: Value) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
                "requestResource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
                "object": object,
                "oldObject": null,
                "dryRun": false,
                "options": null
            }
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    fn pod(labels: Value, containers: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "hello", "namespace": "default", "labels": labels},
            "spec": {"containers": containers}
        })
    }

    fn patch_of(response: &AdmissionResponse) -> Option<Value> {
        use base64::Engine;

        let review = serde_json::to_value(response.clone().into_review()).unwrap();
        let raw = match &review["response"]["patch"] {
            Value::String(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .unwrap(),
            Value::Array(bytes) => bytes
                .iter()
                .map(|byte| u8::try_from(byte.as_u64().unwrap()).unwrap())
                .collect(),
            _ => return None,
        };
        Some(serde_json::from_slice(&raw).unwrap())
    }

    #[test]
    fn test_unlabelled_pod_is_allowed_without_patch() {
        let req = review(pod(json!({"app": "hello"}), json!([{"name": "app", "image": "app"}])));
        let response = mutate(&req);

        assert!(response.allowed);
        assert_eq!(patch_of(&response), None);
    }

    #[test]
    fn test_labelled_pod_gets_node_ip() {
        let req = review(pod(
            json!({"serving.knative.dev/service": "hello"}),
            json!([
                {"name": "user-container", "image": "app", "env": [{"name": "FOO", "value": "bar"}]},
                {"name": "queue-proxy", "image": "proxy"}
            ]),
        ));
        let response = mutate(&req);

        assert!(response.allowed);
        assert_eq!(
            patch_of(&response),
            Some(json!([{
                "op": "add",
                "path": "/spec/containers/0/env/-",
                "value": {"name": "NODE_IP", "valueFrom": {"fieldRef": {"fieldPath": "status.hostIP"}}}
            }]))
        );
    }

    #[test]
    fn test_container_without_env_gets_env_list() {
        let req = review(pod(
            json!({"serving.knative.dev/revision": "hello-00001"}),
            json!([{"name": "user-container", "image": "app"}]),
        ));
        let patch = patch_of(&mutate(&req)).unwrap();

        assert_eq!(patch[0]["path"], "/spec/containers/0/env");
        assert_eq!(patch[0]["value"][0]["name"], "NODE_IP");
    }

    #[test]
    fn test_existing_variable_is_not_duplicated() {
        let req = review(pod(
            json!({"serving.knative.dev/service": "hello"}),
            json!([{"name": "user-container", "image": "app", "env": [{"name": "NODE_IP", "value": "10.0.0.1"}]}]),
        ));
        let response = mutate(&req);

        assert!(response.allowed);
        assert_eq!(patch_of(&response), None);
    }

    #[test]
    fn test_non_pod_objects_are_allowed() {
        let mut req = review(pod(json!({"serving.knative.dev/service": "hello"}), json!([])));
        req.kind.kind = "ConfigMap".to_string();

        let response = mutate(&req);
        assert!(response.allowed);
        assert_eq!(patch_of(&response), None);
    }

    #[test]
    fn test_response_echoes_uid() {
        let req = review(pod(json!({}), json!([])));
        assert_eq!(mutate(&req).uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
    }

    #[test]
    fn test_undecodable_pod_is_denied() {
        let req = review(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "broken", "labels": {"serving.knative.dev/service": "x"}},
            "spec": {"containers": "not-a-list"}
        }));
        let response = mutate(&req);

        assert!(!response.allowed);
    }
}
