//! `innsight-core`: reporting primitives shared by every layer.
//!
//! This crate contains **pure** types (no runtime, no I/O).

pub mod error;
pub mod id;
pub mod period;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use period::{DateRange, Period};
