//! Networked PostgreSQL store.
//!
//! Server-hosted persistence with JSONB metadata and a pgvector
//! embedding column, wrapped in a bounded r2d2 pool (default 10
//! connections). Each operation takes one pooled connection for its
//! lifetime and releases it on every exit path.
//!
//! The table name is the only identifier taken from configuration; it
//! is validated at config time, before any network I/O, and an
//! invalid name panics - a misconfigured deployment is a programmer
//! error, not a runtime condition.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use postgres::NoTls;
use r2d2_postgres::PostgresConnectionManager;
use regex::Regex;

use crate::embeddings::EmbeddingService;
use crate::error::{MemoryError, Result};
use crate::memory::{
    sorted_or_type_names, validate_metadata_key, Memory, MemoryFilter, MemoryStats, MemoryType,
};
use crate::store::params::{pg_refs, SqlParam};
use crate::store::{MemoryStore, ScoredMemory};

type PgPool = r2d2::Pool<PostgresConnectionManager<NoTls>>;
type PgConn = r2d2::PooledConnection<PostgresConnectionManager<NoTls>>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Default table name
pub const DEFAULT_TABLE_NAME: &str = "agent_memories";

/// Default pool size
pub const DEFAULT_POOL_SIZE: u32 = 10;

fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"))
}

/// Whether a table name is safe to splice into SQL text
pub fn valid_table_name(name: &str) -> bool {
    table_name_pattern().is_match(name)
}

/// Connection settings for [`PostgresStore`]
///
/// Constructed through [`PostgresConfig::new`]; the table name is
/// checked eagerly and an invalid one panics at config time.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    host: String,
    port: u16,
    database: String,
    user: String,
    password: String,
    table_name: String,
    max_pool_size: u32,
}

impl PostgresConfig {
    /// Config with the default table name and pool size
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            max_pool_size: DEFAULT_POOL_SIZE,
        }
    }

    /// Override the table name
    ///
    /// # Panics
    ///
    /// Panics when `table_name` does not match
    /// `^[A-Za-z_][A-Za-z0-9_]{0,62}$`.
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        let table_name = table_name.into();
        assert!(
            valid_table_name(&table_name),
            "invalid table name {table_name:?}: must match ^[A-Za-z_][A-Za-z0-9_]{{0,62}}$"
        );
        self.table_name = table_name;
        self
    }

    /// Override the pool size bound
    pub fn with_max_pool_size(mut self, max_pool_size: u32) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }

    /// Configured table name
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

// ============================================================================
// JSON / EMBEDDING MARSHALLING
// ============================================================================

/// Serialize a metadata map as a JSON object string
pub fn metadata_to_json(metadata: &std::collections::BTreeMap<String, String>) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

/// Parse a JSON object into a string map.
///
/// Lenient by contract: empty or null input, parse failures, and
/// non-object values all produce an empty map. Non-string leaves are
/// coerced to their string form (`3` -> `"3"`, `true` -> `"true"`).
pub fn json_to_metadata(text: &str) -> std::collections::BTreeMap<String, String> {
    let mut map = std::collections::BTreeMap::new();
    if text.trim().is_empty() || text.trim() == "null" {
        return map;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return map;
    };
    let Some(object) = value.as_object() else {
        return map;
    };
    for (key, leaf) in object {
        let rendered = match leaf {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        map.insert(key.clone(), rendered);
    }
    map
}

/// Render an embedding as pgvector text input: `[f1,f2,...]`
pub fn embedding_to_string(embedding: &[f32]) -> String {
    let mut out = String::from("[");
    for (i, component) in embedding.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&component.to_string());
    }
    out.push(']');
    out
}

/// Parse pgvector text output; malformed or empty input yields an
/// empty vector rather than an error
pub fn string_to_embedding(text: &str) -> Vec<f32> {
    let inner = text.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Vec::new();
    }
    let mut parsed = Vec::new();
    for piece in inner.split(',') {
        match piece.trim().parse::<f32>() {
            Ok(component) => parsed.push(component),
            Err(_) => return Vec::new(),
        }
    }
    parsed
}

// ============================================================================
// STORE
// ============================================================================

/// Pooled PostgreSQL store with JSONB metadata and a vector column
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    table: String,
    embedder: Option<Arc<dyn EmbeddingService>>,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("table", &self.table)
            .field("embedder", &self.embedder.is_some())
            .finish()
    }
}

impl PostgresStore {
    /// Connect, build the bounded pool, and bootstrap the schema
    pub fn connect(config: PostgresConfig) -> Result<Self> {
        // Config constructors enforce this; re-check in case the
        // config crossed a serialization boundary
        assert!(
            valid_table_name(&config.table_name),
            "invalid table name {:?}",
            config.table_name
        );

        let mut pg_config = postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password);

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = r2d2::Pool::builder()
            .max_size(config.max_pool_size)
            .build(manager)
            .map_err(|e| MemoryError::processing_from("connect", e))?;

        let store = Self {
            pool,
            table: config.table_name,
            embedder: None,
        };
        store.bootstrap()?;
        Ok(store)
    }

    /// Attach an embedding service enabling semantic search
    pub fn with_embedding_service(mut self, embedder: Arc<dyn EmbeddingService>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    fn conn(&self) -> Result<PgConn> {
        self.pool
            .get()
            .map_err(|e| MemoryError::processing_from("pool", e))
    }

    /// Idempotently ensure the vector extension, table, and indexes
    fn bootstrap(&self) -> Result<()> {
        let t = &self.table;
        let ddl = format!(
            "CREATE EXTENSION IF NOT EXISTS vector;
             CREATE TABLE IF NOT EXISTS {t} (
                 id TEXT PRIMARY KEY,
                 content TEXT NOT NULL,
                 memory_type TEXT NOT NULL,
                 metadata JSONB NOT NULL DEFAULT '{{}}',
                 created_at TIMESTAMPTZ NOT NULL,
                 importance DOUBLE PRECISION,
                 embedding vector
             );
             CREATE INDEX IF NOT EXISTS {t}_type_idx ON {t} (memory_type);
             CREATE INDEX IF NOT EXISTS {t}_created_at_idx ON {t} (created_at);
             CREATE INDEX IF NOT EXISTS {t}_metadata_idx ON {t} USING GIN (metadata);
             CREATE INDEX IF NOT EXISTS {t}_conversation_idx ON {t} ((metadata->>'conversation_id'));"
        );

        self.conn()?
            .batch_execute(&ddl)
            .map_err(|e| MemoryError::processing_from("bootstrap", e))?;
        tracing::debug!(table = %self.table, "postgres schema bootstrapped");
        Ok(())
    }

    // ========================================================================
    // FILTER COMPILATION
    // ========================================================================

    /// Compile a filter to a `$n`-placeholder WHERE fragment plus
    /// typed parameters. `Custom` predicates and illegal metadata
    /// keys fail compilation; callers degrade to row-by-row
    /// evaluation.
    pub fn filter_to_sql(filter: &MemoryFilter) -> Result<(String, Vec<SqlParam>)> {
        let mut sql = String::new();
        let mut params = Vec::new();
        compile_filter(filter, &mut sql, &mut params)?;
        Ok((sql, params))
    }

    fn columns() -> &'static str {
        "id, content, memory_type, metadata::text, created_at, importance, embedding::text"
    }

    fn all_rows_desc(&self) -> Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY created_at DESC",
            Self::columns(),
            self.table
        );
        let rows = self
            .conn()?
            .query(&sql, &[])
            .map_err(|e| MemoryError::processing_from("recall", e))?;
        rows.iter().map(row_to_memory).collect()
    }
}

impl MemoryStore for PostgresStore {
    fn store(&self, memory: Memory) -> Result<Self> {
        let sql = format!(
            "INSERT INTO {} (id, content, memory_type, metadata, created_at, importance, embedding) \
             VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7::vector) \
             ON CONFLICT (id) DO UPDATE SET \
               content = EXCLUDED.content, \
               memory_type = EXCLUDED.memory_type, \
               metadata = EXCLUDED.metadata, \
               created_at = EXCLUDED.created_at, \
               importance = EXCLUDED.importance, \
               embedding = EXCLUDED.embedding",
            self.table
        );

        let metadata_json = metadata_to_json(&memory.metadata);
        let embedding_text = memory.embedding.as_deref().map(embedding_to_string);

        self.conn()?
            .execute(
                &sql,
                &[
                    &memory.id,
                    &memory.content,
                    &memory.memory_type.name(),
                    &metadata_json,
                    &memory.timestamp,
                    &memory.importance,
                    &embedding_text,
                ],
            )
            .map_err(|e| MemoryError::processing_from("store", e))?;
        Ok(self.clone())
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            Self::columns(),
            self.table
        );
        let row = self
            .conn()?
            .query_opt(&sql, &[&id])
            .map_err(|e| MemoryError::processing_from("get", e))?;
        row.as_ref().map(row_to_memory).transpose()
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
        let limit_placeholder = bind.len() + 1;
        bind.push(SqlParam::Int(limit.map_or(i64::MAX, |l| l as i64)));

        let sql = format!(
            "SELECT {} FROM {} WHERE {fragment} \
             ORDER BY created_at DESC LIMIT ${limit_placeholder}",
            Self::columns(),
            self.table
        );

        let rows = self
            .conn()?
            .query(&sql, &pg_refs(&bind))
            .map_err(|e| MemoryError::processing_from("recall", e))?;
        rows.iter().map(row_to_memory).collect()
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredMemory>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let Some(embedder) = self.embedder.as_ref() else {
            return Err(MemoryError::processing(
                "search",
                "semantic search requires an embedding service; \
                 attach one with with_embedding_service",
            ));
        };

        let query_embedding = embedder.embed(query)?;
        if !query_embedding.iter().all(|x| x.is_finite()) {
            return Err(MemoryError::processing(
                "search",
                "query embedding contains non-finite values",
            ));
        }
        let query_text = embedding_to_string(&query_embedding);

        // Exact cosine ordering via the pgvector distance operator;
        // similarity = 1 - distance
        let sql = format!(
            "SELECT {}, 1.0 - (embedding <=> $1::vector) AS score \
             FROM {} \
             WHERE embedding IS NOT NULL \
             ORDER BY embedding <=> $1::vector \
             LIMIT $2",
            Self::columns(),
            self.table
        );

        let rows = self
            .conn()?
            .query(&sql, &[&query_text, &(limit as i64)])
            .map_err(|e| MemoryError::processing_from("search", e))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let memory = row_to_memory(row)?;
            // Guard against rows whose stored vector is unusable
            let finite = memory
                .embedding
                .as_ref()
                .is_some_and(|e| !e.is_empty() && e.iter().all(|x| x.is_finite()));
            if !finite {
                tracing::warn!(id = %memory.id, "skipping row with non-finite embedding");
                continue;
            }
            let score: f64 = row.get("score");
            results.push(ScoredMemory { memory, score });
        }
        Ok(results)
    }

    fn delete(&self, id: &str) -> Result<Self> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        self.conn()?
            .execute(&sql, &[&id])
            .map_err(|e| MemoryError::processing_from("delete", e))?;
        Ok(self.clone())
    }

    fn delete_matching(&self, filter: &MemoryFilter) -> Result<Self> {
        let compiled = if filter.contains_custom() || matches!(filter, MemoryFilter::All) {
            None
        } else {
            Self::filter_to_sql(filter).ok()
        };

        match compiled {
            Some((fragment, bind)) => {
                let sql = format!("DELETE FROM {} WHERE {fragment}", self.table);
                self.conn()?
                    .execute(&sql, &pg_refs(&bind))
                    .map_err(|e| MemoryError::processing_from("delete_matching", e))?;
            }
            None => {
                let matching: Vec<String> = self
                    .all_rows_desc()?
                    .into_iter()
                    .filter(|m| filter.matches(m))
                    .map(|m| m.id)
                    .collect();
                tracing::debug!(rows = matching.len(), "delete_matching via row-by-row fallback");

                let sql = format!("DELETE FROM {} WHERE id = ANY($1)", self.table);
                self.conn()?
                    .execute(&sql, &[&matching])
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
        self.store(updated)
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
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {fragment}", self.table);
        let row = self
            .conn()?
            .query_one(&sql, &pg_refs(&bind))
            .map_err(|e| MemoryError::processing_from("count", e))?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }

    fn clear(&self) -> Result<Self> {
        let sql = format!("DELETE FROM {}", self.table);
        self.conn()?
            .execute(&sql, &[])
            .map_err(|e| MemoryError::processing_from("clear", e))?;
        Ok(self.clone())
    }

    fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats::from_memories(&self.all_rows_desc()?))
    }

    fn replace_group(&self, remove_ids: &[String], insert: Memory) -> Result<Self> {
        let delete_sql = format!("DELETE FROM {} WHERE id = ANY($1)", self.table);
        let insert_sql = format!(
            "INSERT INTO {} (id, content, memory_type, metadata, created_at, importance, embedding) \
             VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7::vector)",
            self.table
        );

        let metadata_json = metadata_to_json(&insert.metadata);
        let embedding_text = insert.embedding.as_deref().map(embedding_to_string);
        let ids: Vec<&str> = remove_ids.iter().map(String::as_str).collect();

        let mut conn = self.conn()?;
        let mut tx = conn
            .transaction()
            .map_err(|e| MemoryError::processing_from("replace_group", e))?;
        tx.execute(&delete_sql, &[&ids])
            .map_err(|e| MemoryError::processing_from("replace_group", e))?;
        tx.execute(
            &insert_sql,
            &[
                &insert.id,
                &insert.content,
                &insert.memory_type.name(),
                &metadata_json,
                &insert.timestamp,
                &insert.importance,
                &embedding_text,
            ],
        )
        .map_err(|e| MemoryError::processing_from("replace_group", e))?;
        tx.commit()
            .map_err(|e| MemoryError::processing_from("replace_group", e))?;
        Ok(self.clone())
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn row_to_memory(row: &postgres::Row) -> Result<Memory> {
    let id: String = row.get(0);
    let content: String = row.get(1);
    let type_name: String = row.get(2);
    let metadata_text: String = row.get(3);
    let created_at: DateTime<Utc> = row.get(4);
    let importance: Option<f64> = row.get(5);
    let embedding_text: Option<String> = row.get(6);

    Ok(Memory {
        id,
        content,
        memory_type: MemoryType::parse_name(&type_name),
        metadata: json_to_metadata(&metadata_text),
        timestamp: created_at,
        importance,
        embedding: embedding_text.map(|text| string_to_embedding(&text)),
    })
}

// ============================================================================
// FILTER COMPILER
// ============================================================================

fn push_param(sql: &mut String, params: &mut Vec<SqlParam>, param: SqlParam) {
    params.push(param);
    sql.push('$');
    sql.push_str(&params.len().to_string());
}

fn compile_filter(
    filter: &MemoryFilter,
    sql: &mut String,
    params: &mut Vec<SqlParam>,
) -> Result<()> {
    match filter {
        MemoryFilter::All => sql.push_str("TRUE"),
        MemoryFilter::None => sql.push_str("FALSE"),
        MemoryFilter::ByType(memory_type) => {
            sql.push_str("memory_type = ");
            push_param(sql, params, SqlParam::text(memory_type.name()));
        }
        MemoryFilter::ByTypes(types) => {
            let mut names: Vec<&str> = types.iter().map(MemoryType::name).collect();
            names.sort_unstable();
            names.dedup();
            if names.is_empty() {
                sql.push_str("FALSE");
            } else {
                sql.push_str("memory_type IN (");
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    push_param(sql, params, SqlParam::text(*name));
                }
                sql.push(')');
            }
        }
        MemoryFilter::ByMetadata(key, value) => {
            validate_metadata_key(key)?;
            sql.push_str(&format!("metadata->>'{key}' = "));
            push_param(sql, params, SqlParam::text(value.clone()));
        }
        MemoryFilter::HasMetadata(key) => {
            validate_metadata_key(key)?;
            sql.push_str(&format!("metadata->>'{key}' IS NOT NULL"));
        }
        MemoryFilter::MetadataContains(key, needle) => {
            validate_metadata_key(key)?;
            sql.push_str("position(");
            push_param(sql, params, SqlParam::text(needle.clone()));
            sql.push_str(&format!(" in metadata->>'{key}') > 0"));
        }
        MemoryFilter::ByEntity(entity_id) => {
            sql.push_str("metadata->>'entity_id' = ");
            push_param(sql, params, SqlParam::text(entity_id.clone()));
        }
        MemoryFilter::ByConversation(conversation_id) => {
            sql.push_str("metadata->>'conversation_id' = ");
            push_param(sql, params, SqlParam::text(conversation_id.clone()));
        }
        MemoryFilter::ByTimeRange { after, before } => match (after, before) {
            (Some(a), Some(b)) => {
                sql.push_str("(created_at >= ");
                push_param(sql, params, SqlParam::Timestamp(*a));
                sql.push_str(" AND created_at <= ");
                push_param(sql, params, SqlParam::Timestamp(*b));
                sql.push(')');
            }
            (Some(a), None) => {
                sql.push_str("created_at >= ");
                push_param(sql, params, SqlParam::Timestamp(*a));
            }
            (None, Some(b)) => {
                sql.push_str("created_at <= ");
                push_param(sql, params, SqlParam::Timestamp(*b));
            }
            (None, None) => sql.push_str("TRUE"),
        },
        MemoryFilter::MinImportance(threshold) => {
            sql.push_str("importance >= ");
            push_param(sql, params, SqlParam::Double(*threshold));
        }
        MemoryFilter::ContentContains {
            needle,
            case_sensitive,
        } => {
            if *case_sensitive {
                sql.push_str("position(");
                push_param(sql, params, SqlParam::text(needle.clone()));
                sql.push_str(" in content) > 0");
            } else {
                sql.push_str("position(lower(");
                push_param(sql, params, SqlParam::text(needle.clone()));
                sql.push_str(") in lower(content)) > 0");
            }
        }
        MemoryFilter::And(l, r) => {
            sql.push('(');
            compile_filter(l, sql, params)?;
            sql.push_str(" AND ");
            compile_filter(r, sql, params)?;
            sql.push(')');
        }
        MemoryFilter::Or(l, r) => {
            if let Some(names) = sorted_or_type_names(l, r) {
                sql.push('(');
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" OR ");
                    }
                    sql.push_str("memory_type = ");
                    push_param(sql, params, SqlParam::text(name.clone()));
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
// TESTS (no live server required)
// ============================================================================
