//! Core types and pure decision logic for the Harvest mode-resolution engine.
//!
//! This crate has no HTTP or database dependencies. The
//! store and fetcher backends implement the traits defined here; the engine
//! crate drives them.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod attribution;
pub mod error;
pub mod evaluate;
pub mod mode;
pub mod payload;
pub mod permission;
pub mod source;
pub mod state;

pub use error::{Error, Result};
