use anyhow::Result;
use std::env;

/// Settings for the outbound email delivery endpoint and the local send time.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub email_api_url: String,
    /// Outbound request timeout in milliseconds.
    pub email_api_timeout_ms: u64,
    /// Hour of day (0-23, recipient-local) at which birthday messages go out.
    pub message_hour: u32,
}

impl DeliveryConfig {
    pub fn from_env() -> Result<Self> {
        let message_hour: u32 = env::var("BIRTHDAY_MESSAGE_HOUR")
            .unwrap_or_else(|_| "9".to_string())
            .parse()
            .unwrap_or(9);

        if message_hour > 23 {
            return Err(anyhow::anyhow!(
                "BIRTHDAY_MESSAGE_HOUR must be between 0 and 23, got {}",
                message_hour
            ));
        }

        Ok(DeliveryConfig {
            email_api_url: env::var("EMAIL_API_URL").unwrap_or_else(|_| {
                "https://email-service.digitalenvision.com.au/send-email".to_string()
            }),
            email_api_timeout_ms: env::var("EMAIL_API_TIMEOUT")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(10000),
            message_hour,
        })
    }
}
