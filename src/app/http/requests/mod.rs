pub mod user_requests;
