use serial_test::serial;
use std::env;

use wisher::config::delivery::DeliveryConfig;
use wisher::config::queue::QueueConfig;

fn clear_delivery_env() {
    env::remove_var("BIRTHDAY_MESSAGE_HOUR");
    env::remove_var("EMAIL_API_URL");
    env::remove_var("EMAIL_API_TIMEOUT");
}

fn clear_queue_env() {
    env::remove_var("QUEUE_MAX_RETRIES");
    env::remove_var("QUEUE_CONCURRENCY");
    env::remove_var("QUEUE_FAILED_RETENTION_DAYS");
}

#[test]
#[serial]
fn delivery_config_defaults() {
    clear_delivery_env();

    let config = DeliveryConfig::from_env().unwrap();

    assert_eq!(config.message_hour, 9);
    assert_eq!(config.email_api_timeout_ms, 10000);
    assert_eq!(
        config.email_api_url,
        "https://email-service.digitalenvision.com.au/send-email"
    );
}

#[test]
#[serial]
fn delivery_config_reads_overrides() {
    clear_delivery_env();
    env::set_var("BIRTHDAY_MESSAGE_HOUR", "7");
    env::set_var("EMAIL_API_URL", "http://localhost:8025/send-email");
    env::set_var("EMAIL_API_TIMEOUT", "2500");

    let config = DeliveryConfig::from_env().unwrap();

    assert_eq!(config.message_hour, 7);
    assert_eq!(config.email_api_url, "http://localhost:8025/send-email");
    assert_eq!(config.email_api_timeout_ms, 2500);

    clear_delivery_env();
}

#[test]
#[serial]
fn delivery_config_rejects_out_of_range_hours() {
    clear_delivery_env();
    env::set_var("BIRTHDAY_MESSAGE_HOUR", "24");

    assert!(DeliveryConfig::from_env().is_err());

    clear_delivery_env();
}

#[test]
#[serial]
fn queue_config_defaults() {
    clear_queue_env();

    let config = QueueConfig::from_env().unwrap();

    assert_eq!(config.max_retries, 5);
    assert_eq!(config.concurrency, 5);
    assert_eq!(config.failed_retention_days, 7);
}

#[test]
#[serial]
fn queue_config_reads_overrides() {
    clear_queue_env();
    env::set_var("QUEUE_MAX_RETRIES", "3");
    env::set_var("QUEUE_CONCURRENCY", "10");

    let config = QueueConfig::from_env().unwrap();

    assert_eq!(config.max_retries, 3);
    assert_eq!(config.concurrency, 10);

    clear_queue_env();
}
