use chrono::NaiveDate;
use std::time::Duration;

use wisher::app::models::user::{CreateUser, User};
use wisher::app::services::email_delivery_service::{DeliveryError, EmailDeliveryService};

fn john_doe() -> User {
    User::new(CreateUser {
        first_name: "John".to_string(),
        last_name: "Doe".to_string(),
        email: "john@x".to_string(),
        birthdate: NaiveDate::from_ymd_opt(1990, 1, 15).unwrap(),
        timezone: "America/New_York".to_string(),
    })
}

#[test]
fn message_body_is_the_exact_greeting() {
    let user = john_doe();

    assert_eq!(
        EmailDeliveryService::render_birthday_message(&user),
        "Hey, John Doe it's your birthday"
    );
}

#[test]
fn client_errors_are_permanent() {
    let error = DeliveryError::Permanent {
        status: 422,
        body: "unknown recipient".to_string(),
    };

    assert!(!error.is_retriable());
}

#[test]
fn server_errors_timeouts_and_open_circuit_are_retriable() {
    let transient = DeliveryError::Transient {
        status: 503,
        body: "service unavailable".to_string(),
    };
    let timeout = DeliveryError::Timeout(Duration::from_secs(10));
    let open = DeliveryError::CircuitOpen;

    assert!(transient.is_retriable());
    assert!(timeout.is_retriable());
    assert!(open.is_retriable());
}
