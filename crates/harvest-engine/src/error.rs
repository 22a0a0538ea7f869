//! Error types for `harvest-engine`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The orchestrator task has stopped; no further signals are accepted.
  #[error("engine is no longer running")]
  Closed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
