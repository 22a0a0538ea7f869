//! Error types for `harvest-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown state key: {0:?}")]
  UnknownKey(String),

  #[error("invalid boolean flag: {0:?}")]
  InvalidFlag(String),

  #[error("date/time parse error: {0}")]
  DateParse(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
