//! Embedded SQLite store.
//!
//! File-backed or in-memory relational persistence with an FTS5 index
//! for lexical search. Reads and writes serialize through a single
//! connection; mutators return a new store value sharing that
//! connection, keeping the value-semantic contract of the in-process
//! stores.
//!
//! Timestamps persist as RFC 3339 text with fixed millisecond
//! precision and a `Z` suffix, so lexicographic comparison in SQL is
//! chronological comparison. Embeddings persist as packed
//! little-endian f32 BLOBs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{MemoryError, Result};
use crate::memory::{
    sorted_or_type_names, validate_metadata_key, Memory, MemoryFilter, MemoryStats, MemoryType,
};
use crate::store::params::{sqlite_timestamp, SqlParam};
use crate::store::{MemoryStore, ScoredMemory};

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    memory_type TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    timestamp TEXT NOT NULL,
    importance REAL,
    embedding BLOB
);

CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_timestamp ON memories(timestamp);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    id UNINDEXED,
    content
);
"#;

const COLUMNS: &str = "id, content, memory_type, metadata, timestamp, importance, embedding";
const COLUMNS_M: &str =
    "m.id, m.content, m.memory_type, m.metadata, m.timestamp, m.importance, m.embedding";

// ============================================================================
// STORE
// ============================================================================

/// Embedded SQL store over one serialized connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a store at `path`; `":memory:"` is ephemeral
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| MemoryError::processing_from("open", e))?;
        Self::from_connection(conn)
    }

    /// Open an ephemeral in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MemoryError::processing_from("open", e))?;
        Self::from_connection(conn)
    }

    /// Open the store at the platform data directory
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    /// Platform-specific database path, creating the directory
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "memoir", "core").ok_or_else(|| {
            MemoryError::processing("open", "could not determine project directories")
        })?;

        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .map_err(|e| MemoryError::processing_from("open", e))?;
        // Restrict directory permissions to owner-only on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            let _ = std::fs::set_permissions(data_dir, perms);
        }
        Ok(data_dir.join("memoir.db"))
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| MemoryError::processing_from("open", e))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| MemoryError::processing_from("bootstrap", e))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MemoryError::processing("lock", "connection lock poisoned"))
    }

    // ========================================================================
    // FILTER COMPILATION
    // ========================================================================

    /// Compile a filter to a SQLite WHERE fragment plus parameters.
    ///
    /// Fails with a validation error for `Custom` predicates and for
    /// metadata keys outside the identifier pattern; callers degrade
    /// to row-by-row evaluation on failure.
    pub fn filter_to_sql(filter: &MemoryFilter) -> Result<(String, Vec<SqlParam>)> {
        let mut sql = String::new();
        let mut params = Vec::new();
        compile_filter(filter, &mut sql, &mut params)?;
        Ok((sql, params))
    }

    fn all_rows_desc(&self) -> Result<Vec<Memory>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM memories ORDER BY timestamp DESC"
            ))
            .map_err(|e| MemoryError::processing_from("recall", e))?;

        let rows = stmt
            .query_map([], row_to_memory)
            .map_err(|e| MemoryError::processing_from("recall", e))?
            .collect::<rusqlite::Result<Vec<Memory>>>()
            .map_err(|e| MemoryError::processing_from("recall", e))?;
        Ok(rows)
    }
}

impl MemoryStore for SqliteStore {
    fn store(&self, memory: Memory) -> Result<Self> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::processing_from("store", e))?;
        upsert_row(&tx, &memory)?;
        tx.commit()
            .map_err(|e| MemoryError::processing_from("store", e))?;
        drop(conn);
        Ok(self.clone())
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM memories WHERE id = ?1"),
            params![id],
            row_to_memory,
        )
        .optional()
        .map_err(|e| MemoryError::processing_from("get", e))
    }

    fn recall(&self, filter: &MemoryFilter, limit: Option<usize>) -> Result<Vec<Memory>> {
        if filter.contains_custom() {
            let mut rows: Vec<Memory> = self
                .all_rows_desc()?
                .into_iter()
                .filter(|m| filter.matches(m))
                .collect();
            if let Some(limit) = limit {
                rows.truncate(limit);
            }
            return Ok(rows);
        }

        let (fragment, mut bind) = Self::filter_to_sql(filter)?;
        // SQLite treats LIMIT -1 as "no limit"
        bind.push(SqlParam::Int(limit.map_or(-1, |l| l as i64)));

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM memories WHERE {fragment} \
                 ORDER BY timestamp DESC LIMIT ?"
            ))
            .map_err(|e| MemoryError::processing_from("recall", e))?;

        let rows = stmt
            .query_map(params_from_iter(bind.iter()), row_to_memory)
            .map_err(|e| MemoryError::processing_from("recall", e))?
            .collect::<rusqlite::Result<Vec<Memory>>>()
            .map_err(|e| MemoryError::processing_from("recall", e))?;
        Ok(rows)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredMemory>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = sanitize_fts_query(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS_M}, bm25(memories_fts) AS rank \
                 FROM memories_fts \
                 JOIN memories m ON m.id = memories_fts.id \
                 WHERE memories_fts MATCH ?1 \
                 ORDER BY rank \
                 LIMIT ?2"
            ))
            .map_err(|e| MemoryError::processing_from("search", e))?;

        let rows = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                let memory = row_to_memory(row)?;
                let rank: f64 = row.get(7)?;
                Ok((memory, rank))
            })
            .map_err(|e| MemoryError::processing_from("search", e))?
            .collect::<rusqlite::Result<Vec<(Memory, f64)>>>()
            .map_err(|e| MemoryError::processing_from("search", e))?;

        Ok(rows
            .into_iter()
            .map(|(memory, rank)| ScoredMemory {
                memory,
                score: normalize_bm25(rank),
            })
            .collect())
    }

    fn delete(&self, id: &str) -> Result<Self> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::processing_from("delete", e))?;
        delete_row(&tx, id)?;
        tx.commit()
            .map_err(|e| MemoryError::processing_from("delete", e))?;
        drop(conn);
        Ok(self.clone())
    }

    fn delete_matching(&self, filter: &MemoryFilter) -> Result<Self> {
        // All and Custom go through the in-process path; so does any
        // filter that fails to compile (e.g. illegal metadata key)
        let compiled = if filter.contains_custom() || matches!(filter, MemoryFilter::All) {
            None
        } else {
            Self::filter_to_sql(filter).ok()
        };

        match compiled {
            Some((fragment, bind)) => {
                let mut conn = self.conn()?;
                let tx = conn
                    .transaction()
                    .map_err(|e| MemoryError::processing_from("delete_matching", e))?;
                tx.execute(
                    &format!(
                        "DELETE FROM memories_fts WHERE id IN \
                         (SELECT id FROM memories WHERE {fragment})"
                    ),
                    params_from_iter(bind.iter()),
                )
                .map_err(|e| MemoryError::processing_from("delete_matching", e))?;
                tx.execute(
                    &format!("DELETE FROM memories WHERE {fragment}"),
                    params_from_iter(bind.iter()),
                )
                .map_err(|e| MemoryError::processing_from("delete_matching", e))?;
                tx.commit()
                    .map_err(|e| MemoryError::processing_from("delete_matching", e))?;
            }
            None => {
                // Safe fallback: evaluate row-by-row, delete by id in
                // one transaction together with the FTS entries
                let matching: Vec<String> = self
                    .all_rows_desc()?
                    .into_iter()
                    .filter(|m| filter.matches(m))
                    .map(|m| m.id)
                    .collect();
                tracing::debug!(rows = matching.len(), "delete_matching via row-by-row fallback");

                let mut conn = self.conn()?;
                let tx = conn
                    .transaction()
                    .map_err(|e| MemoryError::processing_from("delete_matching", e))?;
                for id in &matching {
                    delete_row(&tx, id)?;
                }
                tx.commit()
                    .map_err(|e| MemoryError::processing_from("delete_matching", e))?;
            }
        }
        Ok(self.clone())
    }

    fn update(&self, id: &str, apply: &dyn Fn(Memory) -> Memory) -> Result<Self> {
        let current = self
            .get(id)?
            .ok_or_else(|| MemoryError::not_found(format!("memory {id}")))?;

        let updated = apply(current);
        if updated.id != id {
            return Err(MemoryError::validation(
                "id",
                "a memory's id cannot be changed by update",
            ));
        }

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::processing_from("update", e))?;
        upsert_row(&tx, &updated)?;
        tx.commit()
            .map_err(|e| MemoryError::processing_from("update", e))?;
        drop(conn);
        Ok(self.clone())
    }

    fn count(&self, filter: &MemoryFilter) -> Result<usize> {
        if filter.contains_custom() {
            return Ok(self
                .all_rows_desc()?
                .iter()
                .filter(|m| filter.matches(m))
                .count());
        }

        let (fragment, bind) = Self::filter_to_sql(filter)?;
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM memories WHERE {fragment}"),
                params_from_iter(bind.iter()),
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::processing_from("count", e))?;
        Ok(count as usize)
    }

    fn clear(&self) -> Result<Self> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::processing_from("clear", e))?;
        tx.execute("DELETE FROM memories_fts", [])
            .map_err(|e| MemoryError::processing_from("clear", e))?;
        tx.execute("DELETE FROM memories", [])
            .map_err(|e| MemoryError::processing_from("clear", e))?;
        tx.commit()
            .map_err(|e| MemoryError::processing_from("clear", e))?;
        drop(conn);
        Ok(self.clone())
    }

    fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats::from_memories(&self.all_rows_desc()?))
    }

    fn replace_group(&self, remove_ids: &[String], insert: Memory) -> Result<Self> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::processing_from("replace_group", e))?;
        for id in remove_ids {
            delete_row(&tx, id)?;
        }
        upsert_row(&tx, &insert)?;
        tx.commit()
            .map_err(|e| MemoryError::processing_from("replace_group", e))?;
        drop(conn);
        Ok(self.clone())
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn upsert_row(tx: &rusqlite::Transaction<'_>, memory: &Memory) -> Result<()> {
    let metadata_json = serde_json::to_string(&memory.metadata)
        .map_err(|e| MemoryError::processing_from("store", e))?;

    tx.execute(
        "INSERT OR REPLACE INTO memories \
         (id, content, memory_type, metadata, timestamp, importance, embedding) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            memory.id,
            memory.content,
            memory.memory_type.name(),
            metadata_json,
            sqlite_timestamp(&memory.timestamp),
            memory.importance,
            memory.embedding.as_deref().map(embedding_to_blob),
        ],
    )
    .map_err(|e| MemoryError::processing_from("store", e))?;

    tx.execute(
        "DELETE FROM memories_fts WHERE id = ?1",
        params![memory.id],
    )
    .map_err(|e| MemoryError::processing_from("store", e))?;
    tx.execute(
        "INSERT INTO memories_fts (id, content) VALUES (?1, ?2)",
        params![memory.id, memory.content],
    )
    .map_err(|e| MemoryError::processing_from("store", e))?;
    Ok(())
}

fn delete_row(tx: &rusqlite::Transaction<'_>, id: &str) -> Result<()> {
    tx.execute("DELETE FROM memories_fts WHERE id = ?1", params![id])
        .map_err(|e| MemoryError::processing_from("delete", e))?;
    tx.execute("DELETE FROM memories WHERE id = ?1", params![id])
        .map_err(|e| MemoryError::processing_from("delete", e))?;
    Ok(())
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    use rusqlite::types::Type;

    let id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let type_name: String = row.get(2)?;
    let metadata_json: String = row.get(3)?;
    let timestamp_text: String = row.get(4)?;
    let importance: Option<f64> = row.get(5)?;
    let embedding_blob: Option<Vec<u8>> = row.get(6)?;

    let metadata = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Memory {
        id,
        content,
        memory_type: MemoryType::parse_name(&type_name),
        metadata,
        timestamp,
        importance,
        embedding: embedding_blob.as_deref().and_then(blob_to_embedding),
    })
}

/// Pack an embedding as little-endian f32 bytes
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Unpack an embedding; None for a malformed length
fn blob_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

// ============================================================================
// SEARCH HELPERS
// ============================================================================

/// Strip FTS5 operators and quote each term; terms join with OR so a
/// partial match still ranks. Returns an empty string when nothing
/// searchable remains.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| {
            term.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{term}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Monotone map from a bm25 rank (more negative = better) to [0, 1)
fn normalize_bm25(rank: f64) -> f64 {
    let goodness = (-rank).max(0.0);
    goodness / (1.0 + goodness)
}

// ============================================================================
// FILTER COMPILER
// ============================================================================

fn compile_filter(
    filter: &MemoryFilter,
    sql: &mut String,
    params: &mut Vec<SqlParam>,
) -> Result<()> {
    match filter {
        MemoryFilter::All => sql.push_str("1 = 1"),
        MemoryFilter::None => sql.push_str("1 = 0"),
        MemoryFilter::ByType(memory_type) => {
            sql.push_str("memory_type = ?");
            params.push(SqlParam::text(memory_type.name()));
        }
        MemoryFilter::ByTypes(types) => {
            let mut names: Vec<&str> = types.iter().map(MemoryType::name).collect();
            names.sort_unstable();
            names.dedup();
            if names.is_empty() {
                sql.push_str("1 = 0");
            } else {
                sql.push_str("memory_type IN (");
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    params.push(SqlParam::text(*name));
                }
                sql.push(')');
            }
        }
        MemoryFilter::ByMetadata(key, value) => {
            validate_metadata_key(key)?;
            sql.push_str(&format!("json_extract(metadata, '$.{key}') = ?"));
            params.push(SqlParam::text(value.clone()));
        }
        MemoryFilter::HasMetadata(key) => {
            validate_metadata_key(key)?;
            sql.push_str(&format!("json_extract(metadata, '$.{key}') IS NOT NULL"));
        }
        MemoryFilter::MetadataContains(key, needle) => {
            validate_metadata_key(key)?;
            sql.push_str(&format!("instr(json_extract(metadata, '$.{key}'), ?) > 0"));
            params.push(SqlParam::text(needle.clone()));
        }
        MemoryFilter::ByEntity(entity_id) => {
            sql.push_str("json_extract(metadata, '$.entity_id') = ?");
            params.push(SqlParam::text(entity_id.clone()));
        }
        MemoryFilter::ByConversation(conversation_id) => {
            sql.push_str("json_extract(metadata, '$.conversation_id') = ?");
            params.push(SqlParam::text(conversation_id.clone()));
        }
        MemoryFilter::ByTimeRange { after, before } => match (after, before) {
            (Some(a), Some(b)) => {
                sql.push_str("(timestamp >= ? AND timestamp <= ?)");
                params.push(SqlParam::Timestamp(*a));
                params.push(SqlParam::Timestamp(*b));
            }
            (Some(a), None) => {
                sql.push_str("timestamp >= ?");
                params.push(SqlParam::Timestamp(*a));
            }
            (None, Some(b)) => {
                sql.push_str("timestamp <= ?");
                params.push(SqlParam::Timestamp(*b));
            }
            (None, None) => sql.push_str("1 = 1"),
        },
        MemoryFilter::MinImportance(threshold) => {
            sql.push_str("importance >= ?");
            params.push(SqlParam::Double(*threshold));
        }
        MemoryFilter::ContentContains {
            needle,
            case_sensitive,
        } => {
            if *case_sensitive {
                sql.push_str("instr(content, ?) > 0");
            } else {
                sql.push_str("instr(lower(content), lower(?)) > 0");
            }
            params.push(SqlParam::text(needle.clone()));
        }
        MemoryFilter::And(l, r) => {
            sql.push('(');
            compile_filter(l, sql, params)?;
            sql.push_str(" AND ");
            compile_filter(r, sql, params)?;
            sql.push(')');
        }
        MemoryFilter::Or(l, r) => {
            // An Or of two bare type tests binds in sorted-name order
            // so compiled SQL is deterministic however it was written
            if let Some(names) = sorted_or_type_names(l, r) {
                sql.push('(');
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" OR ");
                    }
                    sql.push_str("memory_type = ?");
                    params.push(SqlParam::text(name.clone()));
                }
                sql.push(')');
            } else {
                sql.push('(');
                compile_filter(l, sql, params)?;
                sql.push_str(" OR ");
                compile_filter(r, sql, params)?;
                sql.push(')');
            }
        }
        MemoryFilter::Not(inner) => {
            sql.push_str("NOT (");
            compile_filter(inner, sql, params)?;
            sql.push(')');
        }
        MemoryFilter::Custom(_) => {
            return Err(MemoryError::validation(
                "filter",
                "Custom predicates cannot be compiled to SQL",
            ));
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
