pub mod config;
pub mod error;
pub mod logging;
pub mod notification;
pub mod session_gateway;
pub mod snapshot_store;
pub mod storage;
