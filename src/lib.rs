// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod error;
pub mod indicators;
pub mod models;
pub mod regime;
pub mod service;
pub mod strategy;

// Re-export commonly used types
pub use api::DataProvider;
pub use error::RegimeError;
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, RegimeError>;
