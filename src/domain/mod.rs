pub mod duration_policy;
pub mod models;
pub mod timer;
