/// The SQL shapes that differ per engine: placeholders, column types, and
/// upsert syntax. Sqlite is the wired reference backend; the other
/// dialects render the statements the matching drivers execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
    MySql,
}

impl SqlDialect {
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            SqlDialect::Sqlite | SqlDialect::MySql => "?".to_string(),
            SqlDialect::Postgres => format!("${position}"),
        }
    }

    fn payload_type(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "TEXT",
            SqlDialect::Postgres => "JSONB",
            SqlDialect::MySql => "JSON",
        }
    }

    fn timestamp_type(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "TEXT",
            SqlDialect::Postgres => "TIMESTAMPTZ",
            SqlDialect::MySql => "TIMESTAMP(6)",
        }
    }

    pub fn create_table_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             id TEXT PRIMARY KEY, \
             payload_json {} NOT NULL, \
             timestamp {} NOT NULL, \
             version INTEGER NOT NULL, \
             expires_at {} NULL)",
            self.payload_type(),
            self.timestamp_type(),
            self.timestamp_type(),
        )
    }

    pub fn create_timestamp_index_sql(&self, table: &str) -> String {
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table} (timestamp DESC)")
    }

    pub fn upsert_sql(&self, table: &str) -> String {
        let values = (1..=5)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ");
        match self {
            SqlDialect::Sqlite | SqlDialect::Postgres => format!(
                "INSERT INTO {table} (id, payload_json, timestamp, version, expires_at) \
                 VALUES ({values}) \
                 ON CONFLICT(id) DO UPDATE SET \
                 payload_json = excluded.payload_json, \
                 timestamp = excluded.timestamp, \
                 version = excluded.version, \
                 expires_at = excluded.expires_at"
            ),
            SqlDialect::MySql => format!(
                "INSERT INTO {table} (id, payload_json, timestamp, version, expires_at) \
                 VALUES ({values}) \
                 ON DUPLICATE KEY UPDATE \
                 payload_json = VALUES(payload_json), \
                 timestamp = VALUES(timestamp), \
                 version = VALUES(version), \
                 expires_at = VALUES(expires_at)"
            ),
        }
    }

    pub fn json_extract_expr(&self, field: &str) -> String {
        match self {
            SqlDialect::Sqlite | SqlDialect::MySql => {
                format!("json_extract(payload_json, '$.{field}')")
            }
            SqlDialect::Postgres => format!("(payload_json ->> '{field}')"),
        }
    }

    pub fn create_native_index_sql(&self, table: &str, index: &str, field: &str, unique: bool) -> String {
        let unique = if unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {unique}INDEX IF NOT EXISTS {index} ON {table} ({})",
            self.json_extract_expr(field)
        )
    }

    pub fn drop_native_index_sql(&self, table: &str, index: &str) -> String {
        match self {
            SqlDialect::MySql => format!("DROP INDEX {index} ON {table}"),
            _ => format!("DROP INDEX IF EXISTS {index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_uses_the_dialect_conflict_clause() {
        assert!(SqlDialect::Sqlite
            .upsert_sql("acorn_users")
            .contains("ON CONFLICT(id) DO UPDATE"));
        assert!(SqlDialect::MySql
            .upsert_sql("acorn_users")
            .contains("ON DUPLICATE KEY UPDATE"));
        assert!(SqlDialect::Postgres.upsert_sql("acorn_users").contains("$5"));
    }

    #[test]
    fn native_index_targets_the_json_projection() {
        let sql = SqlDialect::Sqlite.create_native_index_sql("acorn_users", "idx_email", "email", true);
        assert!(sql.contains("UNIQUE INDEX"));
        assert!(sql.contains("json_extract(payload_json, '$.email')"));

        let pg = SqlDialect::Postgres.create_native_index_sql("acorn_users", "idx_email", "email", false);
        assert!(pg.contains("payload_json ->> 'email'"));
    }
}
