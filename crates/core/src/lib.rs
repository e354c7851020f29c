//! Core domain types and errors for the strata storage engine.
//!
//! This crate establishes the foundational building blocks shared by the
//! engine and its backends:
//!
//! - **`errors`**: the primary `Error` enum and `Result` alias, centralizing
//!   all failure modes for predictable error handling.
//! - **`types`**: the `Priority` and `OperationType` value enums plus the
//!   key/value validation applied before anything enters the queue.

pub mod errors;
pub mod types;

pub use self::{
    errors::{Error, Result},
    types::{validate_key, validate_value, OperationType, Priority},
};
