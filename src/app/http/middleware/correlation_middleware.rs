use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::str::FromStr;
use uuid::Uuid;

use crate::app::models::DieselUlid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Per-request correlation id, attached to log lines, lifecycle events and
/// the response headers.
#[derive(Clone, Debug)]
pub struct CorrelationContext {
    pub correlation_id: DieselUlid,
}

impl CorrelationContext {
    pub fn new() -> Self {
        Self {
            correlation_id: DieselUlid::new(),
        }
    }

    pub fn with_id(correlation_id: DieselUlid) -> Self {
        Self { correlation_id }
    }

    pub fn id_string(&self) -> String {
        self.correlation_id.to_string()
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = extract_or_generate_correlation_id(&request);

    request
        .extensions_mut()
        .insert(CorrelationContext::with_id(correlation_id));

    let mut response = next.run(request).await;

    if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_ID_HEADER), header_value);
    }

    response
}

fn extract_or_generate_correlation_id(request: &Request) -> DieselUlid {
    if let Some(header) = request.headers().get(CORRELATION_ID_HEADER) {
        if let Ok(value) = header.to_str() {
            if let Ok(ulid) = value.parse::<ulid::Ulid>() {
                return DieselUlid::from(ulid);
            }

            // Callers sending UUID correlation ids get a fresh ULID; only the
            // format is normalised, the request is still traceable end-to-end
            // through the response header.
            if Uuid::from_str(value).is_ok() {
                return DieselUlid::new();
            }
        }
    }

    DieselUlid::new()
}
