pub mod health_controller;
pub mod send_controller;
pub mod user_controller;
