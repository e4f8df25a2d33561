//! # Admission Handler
//!
//! `POST /mutate` speaking the AdmissionReview protocol:
//! - 405 for any other method
//! - 400 for a content type other than `application/json`, an undecodable body, or a
//!   review without `request`
//! - 200 with the review response otherwise, echoing the request UID

use crate::admission::{mutate, AdmissionError};
use crate::constants::DEFAULT_SERVICE_PATH;
use crate::observability;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use kube::core::DynamicObject;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

impl AdmissionError {
    fn status(&self) -> StatusCode {
        match self {
            AdmissionError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AdmissionError::UnsupportedContentType(_)
            | AdmissionError::InvalidBody(_)
            | AdmissionError::MissingRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        warn!("Rejecting admission request: {}", self);
        observability::metrics::increment_admission_requests("rejected");
        (self.status(), self.to_string()).into_response()
    }
}

/// Router serving the admission endpoint
pub fn router() -> Router {
    Router::new()
        .route(DEFAULT_SERVICE_PATH, any(mutate_handler))
        .layer(TraceLayer::new_for_http())
}

async fn mutate_handler(
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AdmissionReview<DynamicObject>>, AdmissionError> {
    let request = decode_request(&method, &headers, &body)?;
    let response = mutate(&request);

    let result = if !response.allowed {
        "denied"
    } else if response_has_patch(&response) {
        "patched"
    } else {
        "allowed"
    };
    observability::metrics::increment_admission_requests(result);
    info!(
        uid = %request.uid,
        namespace = request.namespace.as_deref().unwrap_or_default(),
        result,
        "Answered admission request"
    );

    Ok(Json(response.into_review()))
}

/// Validate the HTTP envelope and extract the admission request
pub fn decode_request(
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<AdmissionRequest<DynamicObject>, AdmissionError> {
    if method != Method::POST {
        return Err(AdmissionError::MethodNotAllowed(method.to_string()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("application/json") {
        return Err(AdmissionError::UnsupportedContentType(
            content_type.to_string(),
        ));
    }

    let review: AdmissionReview<DynamicObject> =
        serde_json::from_slice(body).map_err(|e| AdmissionError::InvalidBody(e.to_string()))?;
    let request: AdmissionRequest<DynamicObject> = review.try_into()?;
    Ok(request)
}

fn response_has_patch(response: &kube::core::admission::AdmissionResponse) -> bool {
    serde_json::to_value(response)
        .ok()
        .is_some_and(|value| value.get("patch").is_some_and(|patch| !patch.is_null()))
}
