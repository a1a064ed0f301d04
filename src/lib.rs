pub mod analysis;
pub mod configuration;
pub mod data_capture;
pub mod error_handling;
pub mod session_management;
pub mod storage;
