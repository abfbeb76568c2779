// src/retry/mod.rs
mod strategy;

pub use strategy::{is_failure_status, RetryPolicy};
