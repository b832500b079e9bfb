pub mod catalog;
pub mod dev_url;
pub mod token;
