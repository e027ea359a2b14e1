use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::Value;
use tracing::{debug, error};

use crate::api::Dispatcher;
use crate::codec::WireCodec;
use crate::error::RejectError;

#[derive(Clone)]
pub struct KeyturnState {
    pub dispatcher: Dispatcher,
}

impl KeyturnState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

/// `POST /` runs a batch, `OPTIONS /` answers CORS preflight, anything else is 405.
pub fn keyturn_router(state: KeyturnState) -> Router {
    Router::new()
        .route(
            "/",
            post(process_batch)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .with_state(state)
}

/// Decode with the request's codec, run the batch, answer with the same codec.
async fn process_batch(
    State(state): State<KeyturnState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RejectError> {
    if body.is_empty() {
        return Err(RejectError::EmptyBody);
    }
    let codec = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(WireCodec::from_content_type)
        .ok_or(RejectError::UnsupportedMediaType)?;
    let batch = codec.decode_batch(&body).map_err(|e| {
        debug!(error = %e, "rejecting undecodable request body");
        RejectError::Malformed(e.to_string())
    })?;

    // A panic inside the batch stays inside its task; the server keeps serving.
    let dispatcher = state.dispatcher.clone();
    let results = tokio::spawn(async move { dispatcher.process(&batch).await })
        .await
        .map_err(|e| {
            error!(error = %e, "batch task failed");
            RejectError::Internal
        })?;

    let bytes = codec.encode(&Value::Array(results)).map_err(|e| {
        error!(error = %e, "failed to encode response");
        RejectError::Internal
    })?;
    Ok((
        [
            (header::CONTENT_TYPE, codec.content_type()),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        bytes,
    )
        .into_response())
}

async fn preflight(headers: HeaderMap) -> Response {
    let mut resp = StatusCode::OK.into_response();
    let out = resp.headers_mut();
    if let Some(origin) = headers.get(header::ORIGIN) {
        out.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        if let Some(requested) = headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
            out.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
        }
    }
    out.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("OPTIONS POST"),
    );
    resp
}

async fn method_not_allowed() -> RejectError {
    RejectError::MethodNotAllowed
}
