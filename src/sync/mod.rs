//! Completion signaling primitives.

pub mod async_value;

pub use async_value::{promise, AsyncValue, ExecuteEvent, Promise};
