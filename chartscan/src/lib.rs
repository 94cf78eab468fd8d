// Re-export modules needed for testing
pub mod api;
pub mod chart;
pub mod config;
pub mod error;
pub mod extract;
pub mod inspect;
pub mod models;
pub mod scanner;
pub mod scheduler;
