pub mod admin;
pub mod auth;
pub mod payments;
pub mod requests;
pub mod utils;
