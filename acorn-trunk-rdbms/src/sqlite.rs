use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::runtime::Runtime;
use tracing::warn;

use acorn_core::root::{Root, RootDescriptor};
use acorn_core::trunk::{BatchBuffer, BatchOptions, PendingWrite};
use acorn_core::{AcornError, AcornResult, Nut, ShellCodec, Trunk, TrunkCapabilities};

use crate::dialect::SqlDialect;
use crate::validate_identifier;

#[derive(Debug, Clone)]
pub struct RdbmsOptions {
    pub max_connections: u32,
    /// `None` writes through immediately; `Some` batches upserts into one
    /// transaction per flush.
    pub batching: Option<BatchOptions>,
    /// Deadline applied to every database call; timeouts surface as
    /// retryable transient failures.
    pub op_timeout: Duration,
}

impl Default for RdbmsOptions {
    fn default() -> Self {
        RdbmsOptions {
            max_connections: 5,
            batching: Some(BatchOptions::default()),
            op_timeout: Duration::from_secs(5),
        }
    }
}

/// A database-maintained index over a JSON path inside the stored shell.
#[derive(Debug, Clone)]
pub struct NativeIndexSpec {
    pub name: String,
    /// JSON path below the document root, e.g. `payload.email`.
    pub field: String,
    pub unique: bool,
}

/// Sqlite-backed trunk. The engine is synchronous at the trunk surface;
/// sqlx futures are driven on a dedicated runtime.
pub struct RdbmsTrunk<T> {
    pool: SqlitePool,
    runtime: Arc<Runtime>,
    table: String,
    dialect: SqlDialect,
    io: ShellCodec<T>,
    buffer: Option<BatchBuffer>,
    op_timeout: Duration,
}

fn classify(err: sqlx::Error) -> AcornError {
    match err {
        sqlx::Error::Io(io) => AcornError::Transient(format!("database i/o: {io}")),
        sqlx::Error::PoolTimedOut => AcornError::Transient("connection pool timed out".into()),
        other => AcornError::Trunk(other.to_string()),
    }
}

fn format_ts(at: OffsetDateTime) -> AcornResult<String> {
    at.format(&Rfc3339)
        .map_err(|e| AcornError::Serialization(e.to_string()))
}

impl<T> RdbmsTrunk<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn open(url: &str, type_name: &str) -> AcornResult<Self> {
        RdbmsTrunk::open_with(url, type_name, ShellCodec::json(), RdbmsOptions::default())
    }

    pub fn open_with(
        url: &str,
        type_name: &str,
        io: ShellCodec<T>,
        options: RdbmsOptions,
    ) -> AcornResult<Self> {
        validate_identifier(type_name)?;
        let table = format!("acorn_{type_name}");
        let dialect = SqlDialect::Sqlite;

        let runtime = Arc::new(
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?,
        );

        // Every pooled connection to a plain ":memory:" url gets its own
        // database; collapse the pool so they share one.
        let max_connections = if url.contains(":memory:") {
            1
        } else {
            options.max_connections
        };
        let pool = runtime
            .block_on(
                SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .connect(url),
            )
            .map_err(classify)?;

        runtime
            .block_on(async {
                sqlx::query(&dialect.create_table_sql(&table))
                    .execute(&pool)
                    .await?;
                sqlx::query(&dialect.create_timestamp_index_sql(&table))
                    .execute(&pool)
                    .await
            })
            .map_err(classify)?;

        let buffer = options.batching.clone().map(|batch_options| {
            let pool = pool.clone();
            let runtime = Arc::clone(&runtime);
            let upsert = dialect.upsert_sql(&table);
            BatchBuffer::start(batch_options, move |writes| {
                write_batch(&runtime, &pool, &upsert, writes)
            })
        });

        Ok(RdbmsTrunk {
            pool,
            runtime,
            table,
            dialect,
            io,
            buffer,
            op_timeout: options.op_timeout,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn run<F, R>(&self, fut: F) -> AcornResult<R>
    where
        F: Future<Output = Result<R, sqlx::Error>>,
    {
        match self
            .runtime
            .block_on(tokio::time::timeout(self.op_timeout, fut))
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify(err)),
            Err(_elapsed) => Err(AcornError::Transient(format!(
                "database call exceeded {:?}",
                self.op_timeout
            ))),
        }
    }

    fn upsert_now(&self, write: &PendingWrite) -> AcornResult<()> {
        let sql = self.dialect.upsert_sql(&self.table);
        let shell = String::from_utf8(write.bytes.to_vec())
            .map_err(|e| AcornError::Serialization(e.to_string()))?;
        let timestamp = format_ts(write.timestamp)?;
        let expires_at = write.expires_at.map(format_ts).transpose()?;
        self.run(
            sqlx::query(&sql)
                .bind(&write.id)
                .bind(shell)
                .bind(timestamp)
                .bind(write.version as i64)
                .bind(expires_at)
                .execute(&self.pool),
        )?;
        Ok(())
    }

    fn decode_row(&self, id: &str, shell: &str) -> Option<Nut<T>> {
        match self.io.decode_text(id, shell) {
            Ok(nut) if nut.is_expired() => None,
            Ok(nut) => Some(nut),
            Err(err) => {
                warn!(%id, %err, "undecodable row treated as absent");
                None
            }
        }
    }

    // ---- native indexes -------------------------------------------------

    pub fn create_native_index(&self, spec: &NativeIndexSpec) -> AcornResult<()> {
        validate_identifier(&spec.name)?;
        let sql = self.dialect.create_native_index_sql(
            &self.table,
            &spec.name,
            &spec.field,
            spec.unique,
        );
        self.run(sqlx::query(&sql).execute(&self.pool))?;
        Ok(())
    }

    pub fn drop_native_index(&self, name: &str) -> AcornResult<()> {
        validate_identifier(name)?;
        let sql = self.dialect.drop_native_index_sql(&self.table, name);
        self.run(sqlx::query(&sql).execute(&self.pool))?;
        Ok(())
    }

    pub fn verify_native_index(&self, name: &str) -> AcornResult<bool> {
        validate_identifier(name)?;
        let row = self.run(
            sqlx::query("SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?")
                .bind(name)
                .fetch_optional(&self.pool),
        )?;
        Ok(row.is_some())
    }

    /// Point query pushed down to the engine through the JSON projection.
    pub fn find_ids_by_field(
        &self,
        field: &str,
        value: &serde_json::Value,
    ) -> AcornResult<Vec<String>> {
        let sql = format!(
            "SELECT id FROM {} WHERE {} = ? ORDER BY id",
            self.table,
            self.dialect.json_extract_expr(field)
        );
        let query = sqlx::query(&sql);
        let query = match value {
            serde_json::Value::String(text) => query.bind(text.clone()),
            serde_json::Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap()),
            serde_json::Value::Number(n) => query.bind(n.as_f64().unwrap_or_default()),
            serde_json::Value::Bool(flag) => query.bind(*flag as i64),
            other => query.bind(other.to_string()),
        };
        let rows = self.run(query.fetch_all(&self.pool))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(classify))
            .collect()
    }
}

fn write_batch(
    runtime: &Runtime,
    pool: &SqlitePool,
    upsert: &str,
    writes: Vec<PendingWrite>,
) -> AcornResult<()> {
    runtime
        .block_on(async {
            let mut tx = pool.begin().await?;
            for write in &writes {
                let shell = String::from_utf8_lossy(&write.bytes).into_owned();
                let timestamp = write
                    .timestamp
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| write.timestamp.to_string());
                let expires_at = write
                    .expires_at
                    .and_then(|at| at.format(&Rfc3339).ok());
                sqlx::query(upsert)
                    .bind(&write.id)
                    .bind(shell)
                    .bind(timestamp)
                    .bind(write.version as i64)
                    .bind(expires_at)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        })
        .map_err(classify)
}

impl<T> Trunk<T> for RdbmsTrunk<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()> {
        let shell = self.io.encode_text(nut)?;
        let write = PendingWrite {
            id: id.to_string(),
            bytes: shell.into_bytes().into(),
            timestamp: nut.timestamp,
            version: nut.version,
            expires_at: nut.expires_at,
        };
        match &self.buffer {
            Some(buffer) => {
                buffer.push(write);
                Ok(())
            }
            None => self.upsert_now(&write),
        }
    }

    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        let sql = format!("SELECT payload_json FROM {} WHERE id = ?", self.table);
        let row = self.run(sqlx::query(&sql).bind(id).fetch_optional(&self.pool))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let shell: String = row.try_get("payload_json").map_err(classify)?;
        Ok(self.decode_row(id, &shell))
    }

    fn toss(&self, id: &str) -> AcornResult<()> {
        // Drain pending upserts first so a buffered stash cannot resurrect
        // the row after the delete.
        self.flush()?;
        let sql = format!("DELETE FROM {} WHERE id = ?", self.table);
        self.run(sqlx::query(&sql).bind(id).execute(&self.pool))?;
        Ok(())
    }

    fn crack_all(&self) -> AcornResult<Vec<Nut<T>>> {
        let sql = format!(
            "SELECT id, payload_json FROM {} ORDER BY timestamp DESC",
            self.table
        );
        let rows = self.run(sqlx::query(&sql).fetch_all(&self.pool))?;
        let mut nuts = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(classify)?;
            let shell: String = row.try_get("payload_json").map_err(classify)?;
            if let Some(nut) = self.decode_row(&id, &shell) {
                nuts.push(nut);
            }
        }
        Ok(nuts)
    }

    fn roots(&self) -> Vec<RootDescriptor> {
        self.io.roots()
    }

    fn add_root(&self, root: Arc<dyn Root>) {
        self.io.add_root(root);
    }

    fn remove_root(&self, name: &str) -> bool {
        self.io.remove_root(name)
    }

    fn flush(&self) -> AcornResult<()> {
        if let Some(buffer) = &self.buffer {
            buffer.flush();
        }
        Ok(())
    }

    fn capabilities(&self) -> TrunkCapabilities {
        let mut caps = TrunkCapabilities::durable("rdbms");
        caps.supports_native_indexes = true;
        caps.supports_computed_indexes = true;
        caps
    }

    fn dispose(&self) {
        if let Some(buffer) = &self.buffer {
            buffer.dispose();
        }
        self.runtime.block_on(self.pool.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Member {
        email: String,
        age: i64,
    }

    fn member(email: &str, age: i64) -> Member {
        Member {
            email: email.into(),
            age,
        }
    }

    fn trunk() -> RdbmsTrunk<Member> {
        RdbmsTrunk::open_with(
            "sqlite::memory:",
            "members",
            ShellCodec::json(),
            RdbmsOptions {
                max_connections: 1,
                batching: None,
                op_timeout: Duration::from_secs(5),
            },
        )
        .unwrap()
    }

    #[test]
    fn upsert_round_trip_and_replace() {
        let trunk = trunk();
        let nut = Nut::new("m1", member("a@x", 30)).unwrap();
        trunk.stash("m1", &nut).unwrap();
        assert_eq!(trunk.crack("m1").unwrap().unwrap().payload.age, 30);

        let mut newer = nut.clone();
        newer.payload.age = 31;
        newer.version = 2;
        trunk.stash("m1", &newer).unwrap();
        let stored = trunk.crack("m1").unwrap().unwrap();
        assert_eq!(stored.payload.age, 31);
        assert_eq!(stored.version, 2);
        assert_eq!(trunk.crack_all().unwrap().len(), 1);
    }

    #[test]
    fn toss_deletes_the_row() {
        let trunk = trunk();
        trunk
            .stash("m1", &Nut::new("m1", member("a@x", 30)).unwrap())
            .unwrap();
        trunk.toss("m1").unwrap();
        assert!(trunk.crack("m1").unwrap().is_none());
    }

    #[test]
    fn batched_writes_land_after_flush() {
        let trunk = RdbmsTrunk::open_with(
            "sqlite::memory:",
            "batched",
            ShellCodec::json(),
            RdbmsOptions {
                max_connections: 1,
                batching: Some(BatchOptions {
                    batch_threshold: 100,
                    flush_interval: Duration::from_secs(3600),
                }),
                op_timeout: Duration::from_secs(5),
            },
        )
        .unwrap();

        trunk
            .stash("m1", &Nut::new("m1", member("a@x", 30)).unwrap())
            .unwrap();
        assert!(trunk.crack("m1").unwrap().is_none());

        trunk.flush().unwrap();
        assert!(trunk.crack("m1").unwrap().is_some());
        trunk.dispose();
    }

    #[test]
    fn native_index_lifecycle_and_pushdown_query() {
        let trunk = trunk();
        for (id, email, age) in [("m1", "a@x", 30), ("m2", "b@x", 30), ("m3", "c@x", 40)] {
            trunk
                .stash(id, &Nut::new(id, member(email, age)).unwrap())
                .unwrap();
        }

        let spec = NativeIndexSpec {
            name: "idx_members_age".into(),
            field: "payload.age".into(),
            unique: false,
        };
        trunk.create_native_index(&spec).unwrap();
        assert!(trunk.verify_native_index("idx_members_age").unwrap());

        let ids = trunk
            .find_ids_by_field("payload.age", &serde_json::json!(30))
            .unwrap();
        assert_eq!(ids, vec!["m1", "m2"]);

        trunk.drop_native_index("idx_members_age").unwrap();
        assert!(!trunk.verify_native_index("idx_members_age").unwrap());
    }

    #[test]
    fn unique_native_index_rejects_duplicates() {
        let trunk = trunk();
        trunk
            .stash("m1", &Nut::new("m1", member("a@x", 30)).unwrap())
            .unwrap();
        trunk
            .create_native_index(&NativeIndexSpec {
                name: "idx_members_email".into(),
                field: "payload.email".into(),
                unique: true,
            })
            .unwrap();

        let duplicate = trunk.stash("m2", &Nut::new("m2", member("a@x", 31)).unwrap());
        assert!(duplicate.is_err());
    }

    #[test]
    fn declares_native_index_capabilities() {
        let caps = trunk().capabilities();
        assert!(caps.is_durable);
        assert!(caps.supports_native_indexes);
        assert!(!caps.supports_history);
        assert_eq!(caps.trunk_type, "rdbms");
    }
}
