pub mod capture_engine;
pub mod device_handle;
mod maintenance;
