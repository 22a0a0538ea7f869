//! The Harvest mode-resolution engine.
//!
//! A single [`Orchestrator`] task owns every piece of mutable resolution
//! state. External collaborators talk to it through an [`EngineHandle`],
//! which funnels typed [`Signal`]s into one channel and exposes the
//! published [`Presentation`](harvest_core::mode::Presentation) as a
//! `watch` stream.

pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod handle;
pub mod prefs;

mod orchestrator;

pub use collector::AttributionCollector;
pub use config::{EngineConfig, Timings};
pub use error::{Error, Result};
pub use handle::{EngineHandle, Signal};
pub use orchestrator::Orchestrator;

#[cfg(test)]
mod tests;
