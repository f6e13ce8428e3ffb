pub mod format;
pub mod level_meter;
