//! [`IdentityStore`] — the enrolled gallery, backed by a single SQLite file.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::OptionalExtension as _;

use rollcall_core::{Embedding, Identity};

use crate::{schema::SCHEMA, Result, StoreError};

const SELECT_COLUMNS: &str =
    "SELECT identity_id, display_name, dimension, embedding, enrolled_at, updated_at FROM identities";

/// Gallery of enrolled identities, one embedding per id.
///
/// Every mutation is a single SQL statement executed on the connection
/// thread, so writers to the same id are serialized and readers observe
/// either the previous or the new row in full. Cloning is cheap; clones
/// share the connection.
#[derive(Clone)]
pub struct IdentityStore {
    conn: tokio_rusqlite::Connection,
    dimension: usize,
}

/// Row as stored, before validation.
struct RawIdentity {
    id: String,
    display_name: String,
    dimension: i64,
    embedding: Vec<u8>,
    enrolled_at: String,
    updated_at: String,
}

impl RawIdentity {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            display_name: row.get(1)?,
            dimension: row.get(2)?,
            embedding: row.get(3)?,
            enrolled_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn decode(self, expected_dimension: usize) -> Result<Identity> {
        let what = || format!("identity row {}", self.id);

        if self.dimension != expected_dimension as i64 {
            return Err(StoreError::corrupt(
                what(),
                format!(
                    "stored dimension {} does not match configured dimension {expected_dimension}",
                    self.dimension
                ),
            ));
        }
        let values = decode_embedding(&self.embedding, expected_dimension)
            .map_err(|detail| StoreError::corrupt(what(), detail))?;

        Ok(Identity {
            enrolled_at: decode_dt(&self.enrolled_at).map_err(|d| StoreError::corrupt(what(), d))?,
            updated_at: decode_dt(&self.updated_at).map_err(|d| StoreError::corrupt(what(), d))?,
            id: self.id,
            display_name: self.display_name,
            embedding: Embedding::new(values),
        })
    }
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    embedding
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_embedding(bytes: &[u8], dimension: usize) -> Result<Vec<f32>, String> {
    if bytes.len() != dimension * 4 {
        return Err(format!(
            "embedding blob is {} bytes, expected {}",
            bytes.len(),
            dimension * 4
        ));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err("embedding contains non-finite values".into());
    }
    Ok(values)
}

fn encode_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn decode_dt(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {s:?}: {e}"))
}

impl IdentityStore {
    /// Open (or create) a store at `path` holding `dimension`-length embeddings.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn, dimension };
        store.init_schema().await?;
        tracing::debug!(path = %path.display(), dimension, "identity store opened");
        Ok(store)
    }

    /// Open an in-memory store — useful for testing.
    pub async fn open_in_memory(dimension: usize) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn, dimension };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Embedding length accepted by this store.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn validate(&self, id: &str, embedding: &Embedding) -> Result<()> {
        if embedding.dimension() != self.dimension {
            return Err(StoreError::Dimension {
                id: id.to_string(),
                expected: self.dimension,
                actual: embedding.dimension(),
            });
        }
        if !embedding.is_finite() {
            return Err(StoreError::NonFinite(id.to_string()));
        }
        Ok(())
    }

    /// Insert or overwrite the identity for `id` (last write wins).
    ///
    /// On overwrite the display name and embedding are replaced and
    /// `enrolled_at` is preserved.
    pub async fn put(&self, id: &str, display_name: &str, embedding: &Embedding) -> Result<Identity> {
        self.validate(id, embedding)?;

        let now = Utc::now().trunc_subsecs(0);
        let id_str = id.to_string();
        let name = display_name.to_string();
        let dimension = self.dimension as i64;
        let blob = encode_embedding(embedding);
        let now_str = encode_dt(now);

        let enrolled_at: String = self
            .conn
            .call(move |conn| {
                let enrolled_at = conn.query_row(
                    "INSERT INTO identities (
                         identity_id, display_name, dimension, embedding, enrolled_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(identity_id) DO UPDATE SET
                         display_name = excluded.display_name,
                         dimension    = excluded.dimension,
                         embedding    = excluded.embedding,
                         updated_at   = excluded.updated_at
                     RETURNING enrolled_at",
                    rusqlite::params![id_str, name, dimension, blob, now_str],
                    |r| r.get(0),
                )?;
                Ok(enrolled_at)
            })
            .await?;

        let enrolled_at = decode_dt(&enrolled_at)
            .map_err(|d| StoreError::corrupt(format!("identity row {id}"), d))?;

        tracing::debug!(id, overwrite = enrolled_at != now, "identity stored");

        Ok(Identity {
            id: id.to_string(),
            display_name: display_name.to_string(),
            embedding: embedding.clone(),
            enrolled_at,
            updated_at: now,
        })
    }

    /// Insert a new identity, failing with [`StoreError::AlreadyExists`]
    /// instead of overwriting.
    pub async fn insert(
        &self,
        id: &str,
        display_name: &str,
        embedding: &Embedding,
    ) -> Result<Identity> {
        self.validate(id, embedding)?;

        let now = Utc::now().trunc_subsecs(0);
        let id_str = id.to_string();
        let name = display_name.to_string();
        let dimension = self.dimension as i64;
        let blob = encode_embedding(embedding);
        let now_str = encode_dt(now);

        let inserted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "INSERT INTO identities (
                         identity_id, display_name, dimension, embedding, enrolled_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(identity_id) DO NOTHING",
                    rusqlite::params![id_str, name, dimension, blob, now_str],
                )?;
                Ok(n)
            })
            .await?;

        if inserted == 0 {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }

        Ok(Identity {
            id: id.to_string(),
            display_name: display_name.to_string(),
            embedding: embedding.clone(),
            enrolled_at: now,
            updated_at: now,
        })
    }

    /// Fetch one identity.
    pub async fn get(&self, id: &str) -> Result<Identity> {
        let id_str = id.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                let raw = conn
                    .query_row(
                        &format!("{SELECT_COLUMNS} WHERE identity_id = ?1"),
                        rusqlite::params![id_str],
                        RawIdentity::from_row,
                    )
                    .optional()?;
                Ok(raw)
            })
            .await?;

        raw.ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .decode(self.dimension)
    }

    /// Consistent snapshot of the whole gallery, ordered by id.
    ///
    /// Any unreadable row fails the whole call; a gallery is never returned
    /// with entries silently missing.
    pub async fn get_all(&self) -> Result<Vec<Identity>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY identity_id"))?;
                let rows = stmt
                    .query_map([], RawIdentity::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(|raw| raw.decode(self.dimension)).collect()
    }

    /// Explicitly remove an identity. Returns whether a row was deleted.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let id_str = id.to_string();
        let n = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM identities WHERE identity_id = ?1",
                    rusqlite::params![id_str],
                )?;
                Ok(n)
            })
            .await?;
        if n > 0 {
            tracing::info!(id, "identity removed");
        }
        Ok(n > 0)
    }

    pub async fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .call(|conn| {
                let n = conn.query_row("SELECT COUNT(*) FROM identities", [], |r| r.get(0))?;
                Ok(n)
            })
            .await?;
        Ok(n as usize)
    }
}
