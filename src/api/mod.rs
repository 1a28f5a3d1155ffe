pub mod demo;
pub mod health;
pub mod request_id;
