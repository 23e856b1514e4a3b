//! Shared helpers

pub mod serde;
