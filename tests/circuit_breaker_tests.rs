use std::time::Duration;

use wisher::app::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

fn fast_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        window: Duration::from_secs(60),
        failure_rate_threshold: 0.5,
        min_request_volume: 4,
        open_timeout: Duration::from_millis(50),
    }
}

fn trip(breaker: &CircuitBreaker) {
    for _ in 0..4 {
        assert!(breaker.can_execute());
        breaker.record_failure();
    }
}

#[test]
fn stays_closed_below_the_failure_threshold() {
    let breaker = CircuitBreaker::new("test", fast_config());

    breaker.record_success();
    breaker.record_success();
    breaker.record_success();
    breaker.record_failure();

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.can_execute());
}

#[test]
fn stays_closed_under_minimum_request_volume() {
    let breaker = CircuitBreaker::new("test", fast_config());

    // 100% failures, but only three calls in the window
    breaker.record_failure();
    breaker.record_failure();
    breaker.record_failure();

    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn opens_at_half_failure_rate_and_fails_fast() {
    let breaker = CircuitBreaker::new("test", fast_config());

    breaker.record_success();
    breaker.record_success();
    breaker.record_failure();
    breaker.record_failure();

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.can_execute());
}

#[test]
fn allows_a_single_probe_after_the_open_timeout() {
    let breaker = CircuitBreaker::new("test", fast_config());
    trip(&breaker);

    std::thread::sleep(Duration::from_millis(60));

    assert!(breaker.can_execute());
    // Second caller is held back while the probe is in flight
    assert!(!breaker.can_execute());
}

#[test]
fn closes_again_when_the_probe_succeeds() {
    let breaker = CircuitBreaker::new("test", fast_config());
    trip(&breaker);

    std::thread::sleep(Duration::from_millis(60));
    assert!(breaker.can_execute());
    breaker.record_success();

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.can_execute());
}

#[test]
fn reopens_when_the_probe_fails() {
    let breaker = CircuitBreaker::new("test", fast_config());
    trip(&breaker);

    std::thread::sleep(Duration::from_millis(60));
    assert!(breaker.can_execute());
    breaker.record_failure();

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.can_execute());
}
