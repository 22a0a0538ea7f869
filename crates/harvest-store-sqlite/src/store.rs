//! [`SqliteStore`], the SQLite implementation of [`StateStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;

use harvest_core::state::{StateKey, StateStore, Write, decode_key, encode_dt};

use crate::{Error, Result, schema::SCHEMA};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Harvest persistent state backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Every stored entry, ordered by key. Rows with keys this build does not
  /// know are skipped with a warning.
  pub async fn entries(&self) -> Result<Vec<(StateKey, String)>> {
    let rows: Vec<(String, String)> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT key, value FROM state ORDER BY key")?;
        let rows = stmt
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
      })
      .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for (raw_key, value) in rows {
      match decode_key(&raw_key) {
        Ok(key) => entries.push((key, value)),
        Err(e) => tracing::warn!(key = %raw_key, error = %e, "skipping unknown state row"),
      }
    }
    Ok(entries)
  }
}

// ─── StateStore impl ─────────────────────────────────────────────────────────

impl StateStore for SqliteStore {
  type Error = Error;

  async fn get(&self, key: StateKey) -> Result<Option<String>> {
    let key_str = key.as_ref().to_owned();
    let value = self
      .conn
      .call(move |conn| {
        let value = conn
          .query_row(
            "SELECT value FROM state WHERE key = ?1",
            rusqlite::params![key_str],
            |r| r.get(0),
          )
          .optional()?;
        Ok(value)
      })
      .await?;
    Ok(value)
  }

  async fn apply(&self, writes: Vec<Write>) -> Result<()> {
    if writes.is_empty() {
      return Ok(());
    }
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        // All writes in a batch land in one transaction so a crash can never
        // leave a partially committed decision behind.
        let tx = conn.transaction()?;
        for write in &writes {
          match write {
            Write::Set(key, value) => {
              tx.execute(
                "INSERT INTO state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value      = excluded.value,
                   updated_at = excluded.updated_at",
                rusqlite::params![key.as_ref(), value, now],
              )?;
            }
            Write::Remove(key) => {
              tx.execute(
                "DELETE FROM state WHERE key = ?1",
                rusqlite::params![key.as_ref()],
              )?;
            }
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
