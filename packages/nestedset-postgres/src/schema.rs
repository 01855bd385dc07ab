use postgres::Client;
use nestedset_core::{Error, NestedSetConfig, Result};

const SCHEMA_LOCK_KEY: i64 = 0x6e65737465647365; // "nestedse"

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS nestedset_nodes (
  scope TEXT NOT NULL,
  node BYTEA NOT NULL PRIMARY KEY,
  parent BYTEA,
  lft BIGINT NOT NULL,
  rgt BIGINT NOT NULL,
  depth BIGINT NOT NULL,
  trashed BOOLEAN NOT NULL DEFAULT FALSE,
  payload BYTEA,
  UNIQUE (scope, node),
  FOREIGN KEY (scope, parent) REFERENCES nestedset_nodes (scope, node)
    ON DELETE CASCADE ON UPDATE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_nestedset_nodes_scope_bounds
  ON nestedset_nodes (scope, lft, rgt);

CREATE INDEX IF NOT EXISTS idx_nestedset_nodes_scope_parent
  ON nestedset_nodes (scope, parent);

CREATE TABLE IF NOT EXISTS nestedset_meta (
  scope TEXT PRIMARY KEY,
  config TEXT NOT NULL
);
"#;

pub fn ensure_schema(client: &mut Client) -> Result<()> {
    // `CREATE TABLE IF NOT EXISTS` can still race on the catalog; serialize across processes.
    client
        .query_one("SELECT pg_advisory_lock($1)", &[&SCHEMA_LOCK_KEY])
        .map_err(|e| Error::Storage(format!("{e:?}")))?;

    let res = client
        .batch_execute(SCHEMA_SQL)
        .map_err(|e| Error::Storage(format!("{e:?}")));

    // Locks are also released when the connection is dropped.
    let _ = client.query_one("SELECT pg_advisory_unlock($1)", &[&SCHEMA_LOCK_KEY]);

    res
}

/// Persist the engine configuration used for `scope`.
pub fn save_config(client: &mut Client, scope: &str, config: &NestedSetConfig) -> Result<()> {
    let json = serde_json::to_string(config).map_err(|e| Error::Storage(e.to_string()))?;
    client
        .execute(
            "INSERT INTO nestedset_meta (scope, config) VALUES ($1, $2) \
             ON CONFLICT (scope) DO UPDATE SET config = EXCLUDED.config",
            &[&scope, &json],
        )
        .map_err(|e| Error::Storage(format!("{e:?}")))?;
    Ok(())
}

/// Stored configuration for `scope`, or the default when none was saved.
pub fn load_config(client: &mut Client, scope: &str) -> Result<NestedSetConfig> {
    let row = client
        .query_opt("SELECT config FROM nestedset_meta WHERE scope = $1", &[&scope])
        .map_err(|e| Error::Storage(format!("{e:?}")))?;
    match row {
        Some(row) => {
            let json: String = row.get(0);
            NestedSetConfig::from_json(&json)
        }
        None => Ok(NestedSetConfig::default()),
    }
}

pub fn reset_scope_for_tests(client: &mut Client, scope: &str) -> Result<()> {
    client
        .execute("DELETE FROM nestedset_nodes WHERE scope = $1", &[&scope])
        .map_err(|e| Error::Storage(format!("{e:?}")))?;
    client
        .execute("DELETE FROM nestedset_meta WHERE scope = $1", &[&scope])
        .map_err(|e| Error::Storage(format!("{e:?}")))?;
    Ok(())
}
