pub mod config;
pub mod errors;
pub mod notify;
pub mod process;
pub mod protocol;
pub mod session;
pub mod trust;
