pub mod activity;
pub mod engine;
pub mod registry;
pub(crate) mod resolver;
