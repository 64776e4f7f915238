pub mod auth;
pub mod request;
pub mod tx;
pub mod user;
