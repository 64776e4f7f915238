pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod notify;
pub mod routes;
