pub mod config;
pub mod error;
pub mod sample;
pub mod state;
pub mod target;
