pub mod config;
pub mod error;
pub mod protocol;
pub mod services;
pub mod utils;
