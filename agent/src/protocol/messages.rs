//! JSON-RPC message types shared with the core crate.

pub use prochub_core::protocol::messages::*;
