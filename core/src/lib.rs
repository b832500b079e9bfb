pub mod auth;
pub mod catalog;
pub mod dev_endpoint;
pub mod error;
pub mod schema;
