use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError, QueryResult};
use diesel::sql_types::{BigInt, Text};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::SqlExecutor;
use crate::catalog::Table;
use crate::config::{mask_database_url, AppConfig};
use crate::error::{Error, Result};

#[derive(QueryableByName)]
struct KeyRow {
    #[diesel(sql_type = Text)]
    key_value: String,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    row_count: i64,
}

/// One session against PostgreSQL or CockroachDB.
///
/// The connection is opened lazily and re-opened when the server drops it,
/// at most `reconnect_attempts` times per operation. The current statement
/// timeout is re-applied to every new connection.
pub struct PgSession {
    url: String,
    conn: Option<PgConnection>,
    reconnect_attempts: u32,
    statement_timeout: Duration,
}

impl PgSession {
    pub fn new(url: impl Into<String>, reconnect_attempts: u32, statement_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            conn: None,
            reconnect_attempts: reconnect_attempts.max(1),
            statement_timeout,
        }
    }

    /// Open a session using the configured reconnect policy and command timeout.
    pub fn connect(url: &str, config: &AppConfig) -> Result<Self> {
        let mut session = Self::new(url, config.reconnect_attempts, config.command_timeout());
        session.connection()?;
        Ok(session)
    }

    fn connection(&mut self) -> Result<&mut PgConnection> {
        if self.conn.is_none() {
            let mut last_error = None;
            for attempt in 1..=self.reconnect_attempts {
                match PgConnection::establish(&self.url) {
                    Ok(mut conn) => {
                        conn.batch_execute(&timeout_statement(self.statement_timeout))?;
                        debug!("Connected to {}", mask_database_url(&self.url));
                        self.conn = Some(conn);
                        break;
                    }
                    Err(err) => {
                        warn!(
                            "Connection attempt {}/{} failed: {}",
                            attempt, self.reconnect_attempts, err
                        );
                        last_error = Some(err);
                    }
                }
            }
            if let Some(err) = last_error.filter(|_| self.conn.is_none()) {
                return Err(Error::Connection(err));
            }
        }
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Other("no database connection".to_string()))
    }

    fn run<T, F>(&mut self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut PgConnection) -> QueryResult<T>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(self.connection()?) {
                Ok(value) => return Ok(value),
                Err(err) if is_connection_lost(&err) => {
                    self.conn = None;
                    if attempt >= self.reconnect_attempts {
                        return Err(err.into());
                    }
                    warn!("Connection lost, reconnecting ({}/{})", attempt, self.reconnect_attempts);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn is_connection_lost(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
            | DieselError::BrokenTransactionManager
    )
}

fn timeout_statement(timeout: Duration) -> String {
    format!("SET statement_timeout = '{}ms'", timeout.as_millis())
}

impl SqlExecutor for PgSession {
    fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.run(|conn| conn.transaction::<_, DieselError, _>(|tx| tx.batch_execute(sql)))
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.run(|conn| conn.batch_execute(sql))
    }

    fn fetch_keys(&mut self, table: Table, column: &'static str) -> Result<BTreeSet<String>> {
        let query = format!(
            "SELECT CAST({column} AS TEXT) AS key_value FROM {table} WHERE {column} IS NOT NULL",
            column = column,
            table = table.name()
        );
        let rows: Vec<KeyRow> = self.run(|conn| diesel::sql_query(query.as_str()).load(conn))?;
        Ok(rows.into_iter().map(|row| row.key_value.trim().to_string()).collect())
    }

    fn sample_keys(&mut self, table: Table, column: &'static str, limit: usize) -> Result<Vec<String>> {
        let query = format!(
            "SELECT CAST({column} AS TEXT) AS key_value FROM {table} WHERE {column} IS NOT NULL LIMIT $1",
            column = column,
            table = table.name()
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<KeyRow> = self.run(|conn| {
            diesel::sql_query(query.as_str())
                .bind::<BigInt, _>(limit)
                .load(conn)
        })?;
        Ok(rows.into_iter().map(|row| row.key_value.trim().to_string()).collect())
    }

    fn count_rows(&mut self, table: Table) -> Result<i64> {
        let query = format!("SELECT COUNT(*) AS row_count FROM {}", table.name());
        let row: CountRow = self.run(|conn| diesel::sql_query(query.as_str()).get_result(conn))?;
        Ok(row.row_count)
    }

    fn set_statement_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.statement_timeout = timeout;
        let statement = timeout_statement(timeout);
        self.run(|conn| conn.batch_execute(&statement))
    }
}
