pub mod birthday_planner_service;
pub mod circuit_breaker;
pub mod email_delivery_service;
pub mod scheduled_send_service;
pub mod sweeper_service;
pub mod user_service;
