pub mod capture_models;
pub mod config;
pub mod device_models;
pub mod error;
pub mod state;
pub mod wave_format;
