use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::app::models::user::User;
use crate::app::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::delivery::DeliveryConfig;

/// Outcome classification for a delivery attempt. The worker's retry
/// decisions key off `is_retriable` and nothing else.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// 4xx from the endpoint. The request itself is bad; retrying cannot fix it.
    #[error("delivery endpoint rejected the request with {status}: {body}")]
    Permanent { status: u16, body: String },
    /// 5xx from the endpoint.
    #[error("delivery endpoint failed with {status}: {body}")]
    Transient { status: u16, body: String },
    #[error("delivery request timed out after {0:?}")]
    Timeout(Duration),
    #[error("delivery circuit breaker is open")]
    CircuitOpen,
    #[error("delivery request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl DeliveryError {
    pub fn is_retriable(&self) -> bool {
        !matches!(self, DeliveryError::Permanent { .. })
    }
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    email: &'a str,
    message: &'a str,
}

/// Client for the external email delivery endpoint, wrapped in a circuit
/// breaker and a hard request timeout.
pub struct EmailDeliveryService {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl EmailDeliveryService {
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(config.email_api_timeout_ms);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: config.email_api_url.clone(),
            timeout,
            breaker: CircuitBreaker::new("email-delivery", CircuitBreakerConfig::default()),
        })
    }

    pub fn render_birthday_message(user: &User) -> String {
        format!("Hey, {} it's your birthday", user.full_name())
    }

    /// Send one message. Any 2xx is success; 4xx is permanent; 5xx, timeouts,
    /// network errors and an open circuit are retriable.
    pub async fn send(&self, email: &str, message: &str) -> Result<(), DeliveryError> {
        if !self.breaker.can_execute() {
            return Err(DeliveryError::CircuitOpen);
        }

        let response = self
            .client
            .post(&self.url)
            .json(&SendEmailRequest { email, message })
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    self.breaker.record_success();
                    return Ok(());
                }

                let body = response.text().await.unwrap_or_default();

                if status.is_client_error() {
                    // The endpoint answered; only 5xx count against its health.
                    self.breaker.record_success();
                    Err(DeliveryError::Permanent {
                        status: status.as_u16(),
                        body,
                    })
                } else {
                    self.breaker.record_failure();
                    Err(DeliveryError::Transient {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
            Err(e) => {
                self.breaker.record_failure();
                if e.is_timeout() {
                    Err(DeliveryError::Timeout(self.timeout))
                } else {
                    Err(DeliveryError::Network(e))
                }
            }
        }
    }
}
