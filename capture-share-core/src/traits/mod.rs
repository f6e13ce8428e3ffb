pub mod capture_backend;
pub mod engine_observer;
