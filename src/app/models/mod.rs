pub mod diesel_ulid;
pub mod user;
pub mod scheduled_send;
pub mod jobs;

pub use diesel_ulid::DieselUlid;
