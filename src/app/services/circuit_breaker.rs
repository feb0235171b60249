use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Calls fail fast until the open timeout elapses
    Open,
    /// A single probe call is allowed through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Rolling window over which the failure rate is measured.
    pub window: Duration,
    /// Failure rate at or above which the circuit opens.
    pub failure_rate_threshold: f64,
    /// Minimum calls in the window before the rate is considered meaningful.
    pub min_request_volume: u32,
    /// How long the circuit stays open before allowing a probe.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            failure_rate_threshold: 0.5,
            min_request_volume: 10,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    window_start: Instant,
    successes: u32,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Failure-rate gated switch wrapping the outbound delivery call.
///
/// Opens when the windowed failure rate reaches the threshold, fails fast
/// while open, lets one probe through after the open timeout, and closes
/// again on probe success.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                window_start: Instant::now(),
                successes: 0,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn with_default(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        self.refresh(&mut inner);
        inner.state
    }

    /// Whether a call may proceed. In half-open state only a single probe is
    /// let through; concurrent callers are rejected until the probe reports.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!("Circuit breaker '{}' probe succeeded, closing", self.name);
                self.reset_to_closed(&mut inner);
            }
            _ => {
                self.roll_window(&mut inner);
                inner.successes += 1;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!("Circuit breaker '{}' probe failed, reopening", self.name);
                self.trip(&mut inner);
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                self.roll_window(&mut inner);
                inner.failures += 1;

                let total = inner.successes + inner.failures;
                if total >= self.config.min_request_volume {
                    let rate = inner.failures as f64 / total as f64;
                    if rate >= self.config.failure_rate_threshold {
                        tracing::warn!(
                            "Circuit breaker '{}' opening at failure rate {:.0}% ({}/{})",
                            self.name,
                            rate * 100.0,
                            inner.failures,
                            total
                        );
                        self.trip(&mut inner);
                    }
                }
            }
        }
    }

    fn refresh(&self, inner: &mut CircuitInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.open_timeout {
                    tracing::info!("Circuit breaker '{}' half-open, allowing probe", self.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = false;
                }
            }
        }
    }

    fn roll_window(&self, inner: &mut CircuitInner) {
        if inner.window_start.elapsed() >= self.config.window {
            inner.window_start = Instant::now();
            inner.successes = 0;
            inner.failures = 0;
        }
    }

    fn trip(&self, inner: &mut CircuitInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        inner.successes = 0;
        inner.failures = 0;
    }

    fn reset_to_closed(&self, inner: &mut CircuitInner) {
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.window_start = Instant::now();
        inner.successes = 0;
        inner.failures = 0;
    }
}
