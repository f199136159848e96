//! The concrete SQL engine adapter: an in-process DuckDB connection.
//!
//! This is the one collaborator the executor actually depends on concretely
//! rather than through a trait, since DuckDB is bundled and embedded — there
//! is no remote service to swap out in practice. It owns the connection for
//! the run, serializes access behind a [`Mutex`] so layers can be walked
//! with a `rayon` parallel iterator (see [`crate::executor`]), and is
//! dropped (closing the connection) when the run finishes regardless of
//! outcome.

use std::{path::Path, sync::Mutex};

use duckdb::Connection;

use crate::{
    error::{CheckRuntimeError, engine_error, AppResult},
    schema::TableColumns
};

pub struct DuckDbEngine {
    conn:       Mutex<Connection>,
    table_name: String
}

impl DuckDbEngine {
    pub fn open_in_memory(table_name: impl Into<String>) -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| engine_error(format!("failed to open duckdb connection: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            table_name: table_name.into()
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Load a CSV file into the configured table name via DuckDB's own
    /// `read_csv_auto`. Type coercion beyond what DuckDB infers is the
    /// caller's responsibility (see [`crate::schema::ColumnTypeMap`]).
    pub fn load_csv(&self, path: &Path) -> AppResult<()> {
        let conn = self.conn.lock().expect("duckdb connection mutex poisoned");
        let sql = format!(
            "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_csv_auto('{}')",
            self.table_name,
            path.display().to_string().replace('\'', "''")
        );
        conn.execute_batch(&sql)
            .map_err(|e| engine_error(format!("failed to load table from '{}': {e}", path.display())))
    }

    /// Register an already-materialized Parquet file as the table.
    pub fn load_parquet(&self, path: &Path) -> AppResult<()> {
        let conn = self.conn.lock().expect("duckdb connection mutex poisoned");
        let sql = format!(
            "CREATE OR REPLACE TABLE {} AS SELECT * FROM read_parquet('{}')",
            self.table_name,
            path.display().to_string().replace('\'', "''")
        );
        conn.execute_batch(&sql)
            .map_err(|e| engine_error(format!("failed to load table from '{}': {e}", path.display())))
    }

    /// Execute a requirement-mode query template, binding `{table_name}`,
    /// and return the single `violations` count.
    pub fn execute_violations(&self, rule_id: &str, sql_template: &str) -> Result<i64, CheckRuntimeError> {
        let sql = sql_template.replace("{table_name}", &self.table_name);
        let conn = self.conn.lock().expect("duckdb connection mutex poisoned");
        let mut stmt = conn.prepare(&sql).map_err(|e| CheckRuntimeError::SqlError {
            rule_id: rule_id.to_string(),
            message: e.to_string()
        })?;
        stmt.query_row([], |row| row.get::<_, i64>(0))
            .map_err(|e| CheckRuntimeError::SqlError {
                rule_id: rule_id.to_string(),
                message: e.to_string()
            })
    }

    /// Probe `information_schema.columns` for the columns actually present
    /// in the loaded table.
    pub fn probe_columns(&self, rule_id: &str) -> Result<TableColumns, CheckRuntimeError> {
        let conn = self.conn.lock().expect("duckdb connection mutex poisoned");
        let sql = format!(
            "SELECT column_name FROM information_schema.columns WHERE table_name = '{}'",
            self.table_name.replace('\'', "''")
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| CheckRuntimeError::SqlError {
            rule_id: rule_id.to_string(),
            message: e.to_string()
        })?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| CheckRuntimeError::SqlError {
                rule_id: rule_id.to_string(),
                message: e.to_string()
            })?;

        let mut columns = indexmap::IndexSet::new();
        for row in rows {
            let column = row.map_err(|e| CheckRuntimeError::SqlError {
                rule_id: rule_id.to_string(),
                message: e.to_string()
            })?;
            columns.insert(column);
        }
        Ok(TableColumns(columns))
    }
}
