//! Error codes shared with the core crate.

pub use prochub_core::protocol::errors::*;
