pub mod events;
pub mod http;
pub mod jobs;
pub mod listeners;
pub mod models;
pub mod services;
pub mod utils;
