//! Testing utilities for code built on the retry engine
//!
//! - **[`assertions`]**: duration assertions tolerant of scheduler jitter
//! - **[`operations`]**: scripted operations and a classified test error
//!
//! ## Usage
//!
//! ```rust
//! use steadfast_core::testing::ScriptedOperation;
//!
//! // Fails twice, then succeeds on the third call
//! let op = ScriptedOperation::failing_times(2);
//! assert_eq!(op.calls(), 0);
//! ```

pub mod assertions;
pub mod operations;

pub use assertions::assert_duration_in_range;
pub use operations::{ScriptedOperation, TestError};
