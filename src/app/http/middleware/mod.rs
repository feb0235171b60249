pub mod correlation_middleware;

pub use correlation_middleware::{correlation_middleware, CorrelationContext};
