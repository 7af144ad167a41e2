//! pgvector-backed store driven from a private current-thread runtime.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use pgvector::Vector;
use tokio::runtime::Runtime;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use super::{Metric, StoredHit, VectorStore};
use crate::embeddings::TextSegment;

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        anyhow::ensure!(!schema.trim().is_empty(), "schema name is required");
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Blocking facade over a pgvector table.
///
/// The connection is opened lazily on first use, so building the store never
/// touches the network.
pub struct PgVectorStore {
    client: Mutex<Option<Client>>,
    runtime: Runtime,
    database_url: String,
    table: TableName,
    metric: Metric,
    timeout: Duration,
}

impl PgVectorStore {
    /// Builds a store for `table`; every statement is bounded by `timeout`.
    pub fn new(
        database_url: String,
        table: TableName,
        metric: Metric,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(
            database_url.starts_with("postgres://") || database_url.starts_with("postgresql://"),
            "database URL must start with postgres:// or postgresql://"
        );
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build Postgres runtime")?;
        Ok(Self {
            client: Mutex::new(None),
            runtime,
            database_url,
            table,
            metric,
            timeout,
        })
    }

    fn block_on<F, T>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        let timeout = self.timeout;
        self.runtime
            .block_on(async move { tokio::time::timeout(timeout, fut).await })
            .map_err(|_| anyhow!("{} timed out after {:?}", what, timeout))?
            .with_context(|| format!("failed to {what}"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Client>>> {
        self.client
            .lock()
            .map_err(|_| anyhow!("Postgres client lock poisoned"))
    }

    fn connected<'a>(&self, slot: &'a mut Option<Client>) -> Result<&'a Client> {
        if slot.is_none() {
            let (client, connection) = self.block_on(
                "connect to Postgres",
                tokio_postgres::connect(&self.database_url, NoTls),
            )?;
            self.runtime.spawn(async move {
                if let Err(err) = connection.await {
                    error!(error = %err, "postgres connection error");
                }
            });
            *slot = Some(client);
        }
        slot.as_ref()
            .ok_or_else(|| anyhow!("Postgres client unavailable"))
    }
}

impl VectorStore for PgVectorStore {
    fn describe(&self) -> String {
        format!("pgvector:{}", self.table.qualified())
    }

    fn ping(&self) -> Result<()> {
        let mut guard = self.lock()?;
        let client = self.connected(&mut guard)?;
        self.block_on("ping Postgres", client.execute("SELECT 1", &[]))?;
        Ok(())
    }

    fn prepare(&self, dimension: usize) -> Result<Option<usize>> {
        anyhow::ensure!(dimension > 0, "embedding dimension must be positive");
        let mut guard = self.lock()?;
        let client = self.connected(&mut guard)?;
        self.block_on(
            "ensure pgvector extension",
            client.execute("CREATE EXTENSION IF NOT EXISTS vector", &[]),
        )?;
        let qualified = self.table.qualified();
        let existing = self.block_on(
            "inspect pgvector table",
            client.query_opt(EXISTING_DIMENSION_SQL, &[&qualified]),
        )?;
        if let Some(row) = existing {
            // atttypmod holds n for VECTOR(n) and -1 for an unsized column
            let typmod: i32 = row.get(0);
            debug!(table = %qualified, typmod, "pgvector table exists");
            return Ok(usize::try_from(typmod).ok());
        }
        let ddl = create_table_sql(&self.table, dimension);
        self.block_on("create pgvector table", client.execute(&ddl, &[]))?;
        info!(table = %qualified, dimension, "pgvector table created");
        Ok(None)
    }

    fn insert(&self, segment: &TextSegment) -> Result<()> {
        let mut guard = self.lock()?;
        let client = self.connected(&mut guard)?;
        let vector = Vector::from(segment.embedding.as_slice().to_vec());
        let created = epoch_ms()?;
        let sql = insert_sql(&self.table);
        let inserted = self.block_on(
            "insert segment",
            client.execute(&sql, &[&segment.text, &vector, &created]),
        )?;
        anyhow::ensure!(inserted == 1, "expected 1 inserted row, got {}", inserted);
        Ok(())
    }

    fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<StoredHit>> {
        let mut guard = self.lock()?;
        let client = self.connected(&mut guard)?;
        let query = Vector::from(vector.to_vec());
        let limit = i64::try_from(limit).map_err(|_| anyhow!("limit {} exceeds i64 range", limit))?;
        let sql = select_sql(&self.table, self.metric);
        let rows = self.block_on("search segments", client.query(&sql, &[&query, &limit]))?;
        debug!(rows = rows.len(), "pgvector search returned");
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let distance: f64 = row.get("distance");
            hits.push(StoredHit {
                text: row.get("text"),
                score: self.metric.score_from_pg(distance),
                sequence: u64::try_from(id).map_err(|_| anyhow!("negative row id {}", id))?,
            });
        }
        Ok(hits)
    }
}

const EXISTING_DIMENSION_SQL: &str = "SELECT a.atttypmod \
    FROM pg_attribute a \
    WHERE a.attrelid = to_regclass($1) \
      AND a.attname = 'embedding' \
      AND NOT a.attisdropped";

fn create_table_sql(table: &TableName, dims: usize) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id BIGSERIAL PRIMARY KEY,
            text TEXT NOT NULL,
            embedding VECTOR({dims}) NOT NULL,
            created_epoch_ms BIGINT NOT NULL
        )",
        table.qualified()
    )
}

fn insert_sql(table: &TableName) -> String {
    format!(
        "INSERT INTO {} (text, embedding, created_epoch_ms) VALUES ($1, $2, $3)",
        table.qualified()
    )
}

fn select_sql(table: &TableName, metric: Metric) -> String {
    let op = metric.pg_operator();
    format!(
        "SELECT \
            id, \
            text, \
            (embedding {op} $1)::float8 AS distance \
        FROM {} \
        ORDER BY embedding {op} $1 ASC, id ASC \
        LIMIT $2",
        table.qualified()
    )
}

fn epoch_ms() -> Result<i64> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before the Unix epoch")?
        .as_millis();
    i64::try_from(millis).map_err(|_| anyhow!("timestamp {} exceeds i64 range", millis))
}
