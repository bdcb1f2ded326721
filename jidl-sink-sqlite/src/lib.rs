//! # jidl-sink-sqlite
//!
//! SQLite sink for the jidl data logger.
//!
//! A dedicated OS thread owns the `rusqlite::Connection`; async callers
//! enqueue [`DbCommand`] messages over a bounded `std::sync::mpsc`
//! channel and await a `tokio::sync::oneshot` reply. The async executor
//! is never blocked on SQLite I/O, and the single writer thread
//! serializes every statement.
//!
//! The database lives at `<dir>/<name>.db` in WAL mode. Snapshots use
//! `VACUUM INTO '<path>-<YYYY-MM-DD>.db'`. Diagnostics inserts retry once
//! with a one-millisecond bump when the timestamp primary key collides.
//!
//! The writer thread shuts down when every handle to the sink is gone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use jidl_core::config::ini::{self, IniSection};
use jidl_core::device::BoxFuture;
use jidl_core::error::SinkError;
use jidl_core::sink::statement::StatementBuilder;
use jidl_core::sink::{Row, Sink, SqlDialect, TableSpec, DIAGNOSTICS_TABLE};
use jidl_core::timefmt;

// ---------------------------------------------------------------------------
// Command enum — sent from async callers to the writer thread
// ---------------------------------------------------------------------------

enum DbCommand {
    Open {
        reply: tokio::sync::oneshot::Sender<Result<(), SinkError>>,
    },
    EnsureTables {
        specs: Vec<TableSpec>,
        reply: tokio::sync::oneshot::Sender<Result<(), SinkError>>,
    },
    AddEntry {
        table: String,
        row: Row,
        reply: tokio::sync::oneshot::Sender<Result<(), SinkError>>,
    },
    Log {
        message: String,
        is_error: bool,
        reply: tokio::sync::oneshot::Sender<Result<(), SinkError>>,
    },
    Configuration {
        reply: tokio::sync::oneshot::Sender<Result<Vec<String>, SinkError>>,
    },
    StoreConfiguration {
        rows: Vec<(String, String)>,
        reply: tokio::sync::oneshot::Sender<Result<(), SinkError>>,
    },
    Snapshot {
        date_tag: String,
        reply: tokio::sync::oneshot::Sender<Result<(), SinkError>>,
    },
    Prune {
        days: u32,
        reply: tokio::sync::oneshot::Sender<Result<(), SinkError>>,
    },
}

// ---------------------------------------------------------------------------
// SqliteSink — the public API
// ---------------------------------------------------------------------------

/// SQLite-backed [`Sink`]. `Clone` is cheap; all clones share the writer
/// thread.
#[derive(Clone)]
pub struct SqliteSink {
    tx: std::sync::mpsc::SyncSender<DbCommand>,
}

impl SqliteSink {
    /// Opens (or creates) `<dir>/<name>.db` and starts the writer thread.
    ///
    /// The diagnostics and configuration tables are created up front;
    /// connection tables arrive later through
    /// [`Sink::ensure_tables`].
    pub fn new(name: &str, dir: impl AsRef<Path>) -> Result<SqliteSink, SinkError> {
        let db_path = dir.as_ref().join(format!("{name}.db"));
        let conn = Connection::open(&db_path)
            .map_err(|e| SinkError::Backend(format!("cannot open {}: {e}", db_path.display())))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| SinkError::Backend(e.to_string()))?;

        let builder = StatementBuilder::new(SqlDialect::Sqlite);
        conn.execute_batch(&format!(
            "{}\n{}",
            builder.create_diagnostics_table(),
            builder.create_configuration_table()
        ))
        .map_err(|e| SinkError::Backend(e.to_string()))?;

        // Bound of 64 provides backpressure without being aggressive.
        let (tx, rx) = std::sync::mpsc::sync_channel::<DbCommand>(64);
        std::thread::Builder::new()
            .name("jidl-sqlite".to_string())
            .spawn(move || run_db_thread(conn, db_path, builder, rx))
            .map_err(|e| SinkError::Backend(e.to_string()))?;

        Ok(SqliteSink { tx })
    }
}

// ---------------------------------------------------------------------------
// Writer thread — blocking event loop
// ---------------------------------------------------------------------------

fn run_db_thread(
    conn: Connection,
    db_path: PathBuf,
    builder: StatementBuilder,
    rx: std::sync::mpsc::Receiver<DbCommand>,
) {
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();

    while let Ok(cmd) = rx.recv() {
        match cmd {
            DbCommand::Open { reply } => {
                let result = discover_headers(&conn, &builder).map(|h| headers = h);
                let _ = reply.send(result);
            }

            DbCommand::EnsureTables { specs, reply } => {
                let result = ensure_tables(&conn, &builder, &specs)
                    .and_then(|_| discover_headers(&conn, &builder).map(|h| headers = h));
                let _ = reply.send(result);
            }

            DbCommand::AddEntry { table, row, reply } => {
                let _ = reply.send(insert_row(&conn, &builder, &headers, &table, &row));
            }

            DbCommand::Log {
                message,
                is_error,
                reply,
            } => {
                let result = insert_log_at(
                    &conn,
                    &builder,
                    &timefmt::now_string(),
                    &message,
                    is_error,
                );
                let _ = reply.send(result);
            }

            DbCommand::Configuration { reply } => {
                let _ = reply.send(select_configuration(&conn, &builder));
            }

            DbCommand::StoreConfiguration { rows, reply } => {
                let _ = reply.send(store_configuration(&conn, &builder, &rows));
            }

            DbCommand::Snapshot { date_tag, reply } => {
                let target = format!("{}-{}.db", db_path.display(), date_tag);
                let result = conn
                    .execute_batch(&format!("VACUUM INTO '{}';", target.replace('\'', "''")))
                    .map_err(|e| SinkError::Backend(format!("snapshot failed: {e}")));
                let _ = reply.send(result);
            }

            DbCommand::Prune { days, reply } => {
                let mut result = Ok(());
                let mut tables: Vec<&str> = headers.keys().map(String::as_str).collect();
                tables.push(DIAGNOSTICS_TABLE);
                for table in tables {
                    if let Err(e) = conn.execute_batch(&builder.delete_older_than(table, days)) {
                        result = Err(SinkError::Backend(format!(
                            "cannot prune {table}: {e}"
                        )));
                    }
                }
                let _ = reply.send(result);
            }
        }
    }
    // All handles dropped: exit cleanly.
}

// ---------------------------------------------------------------------------
// SQL helpers
// ---------------------------------------------------------------------------

fn discover_headers(
    conn: &Connection,
    builder: &StatementBuilder,
) -> Result<HashMap<String, Vec<String>>, SinkError> {
    let tables = query_strings(conn, &builder.tables_query())?;
    let mut headers = HashMap::new();
    for table in tables {
        let columns = query_strings(conn, &builder.columns_query(&table))?;
        headers.insert(table, columns);
    }
    Ok(headers)
}

fn ensure_tables(
    conn: &Connection,
    builder: &StatementBuilder,
    specs: &[TableSpec],
) -> Result<(), SinkError> {
    let mut sql = format!(
        "{}\n{}\n",
        builder.create_diagnostics_table(),
        builder.create_configuration_table()
    );
    for spec in specs {
        sql.push_str(&builder.create_connection_table(spec));
        sql.push('\n');
    }
    conn.execute_batch(&sql)
        .map_err(|e| SinkError::Backend(format!("cannot create tables: {e}")))
}

fn insert_row(
    conn: &Connection,
    builder: &StatementBuilder,
    headers: &HashMap<String, Vec<String>>,
    table: &str,
    row: &Row,
) -> Result<(), SinkError> {
    let Some(headers) = headers.get(table) else {
        return Err(SinkError::BadRow {
            table: table.to_string(),
            reason: "unknown table".to_string(),
        });
    };
    let sql = builder
        .insert(table, headers, row)
        .map_err(|reason| SinkError::BadRow {
            table: table.to_string(),
            reason,
        })?;

    match conn.execute_batch(&sql) {
        Ok(()) => Ok(()),
        Err(e) => {
            // A rejected insert is reported into the diagnostics table;
            // only when that also fails is the sink unavailable.
            tracing::warn!("sqlite sink: insert failed: {e}");
            insert_log_at(
                conn,
                builder,
                &timefmt::now_string(),
                &format!("Failed addEntry: {sql}"),
                true,
            )
        }
    }
}

/// Inserts a diagnostics row at an explicit timestamp, retrying once with
/// a one-millisecond bump when the primary key collides.
fn insert_log_at(
    conn: &Connection,
    builder: &StatementBuilder,
    timestamp: &str,
    message: &str,
    is_error: bool,
) -> Result<(), SinkError> {
    let sql = builder.insert_diagnostics(timestamp, message, is_error);
    let outcome = match conn.execute_batch(&sql) {
        Err(e) if is_constraint_violation(&e) => {
            let bumped = timefmt::bump_millisecond(timestamp);
            conn.execute_batch(&builder.insert_diagnostics(&bumped, message, is_error))
        }
        other => other,
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(e) if is_error => Err(SinkError::Unavailable(format!(
            "cannot insert diagnostics: {e}"
        ))),
        Err(e) => Err(SinkError::Backend(format!("cannot insert diagnostics: {e}"))),
    }
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn select_configuration(
    conn: &Connection,
    builder: &StatementBuilder,
) -> Result<Vec<String>, SinkError> {
    query_strings(conn, &builder.select_configuration())
}

fn store_configuration(
    conn: &Connection,
    builder: &StatementBuilder,
    rows: &[(String, String)],
) -> Result<(), SinkError> {
    let mut sql = builder.clear_configuration();
    sql.push('\n');
    for (id, data) in rows {
        sql.push_str(&builder.insert_configuration(id, data));
        sql.push('\n');
    }
    conn.execute_batch(&sql)
        .map_err(|e| SinkError::Backend(format!("cannot store configuration: {e}")))
}

fn query_strings(conn: &Connection, sql: &str) -> Result<Vec<String>, SinkError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| SinkError::Backend(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| SinkError::Backend(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| SinkError::Backend(e.to_string()))
}

// ---------------------------------------------------------------------------
// send_cmd! macro — enqueue + await oneshot
// ---------------------------------------------------------------------------

macro_rules! send_cmd {
    ($tx:expr, $cmd:expr) => {{
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        if $tx.send($cmd(reply_tx)).is_err() {
            return Err(SinkError::Unavailable("sqlite sink has shut down".into()));
        }
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Unavailable("sqlite sink has shut down".into())),
        }
    }};
}

// ---------------------------------------------------------------------------
// Sink impl
// ---------------------------------------------------------------------------

impl Sink for SqliteSink {
    fn open(&self) -> BoxFuture<'_, Result<(), SinkError>> {
        let tx = self.tx.clone();
        Box::pin(async move { send_cmd!(tx, |reply| DbCommand::Open { reply }) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        // The writer thread lives as long as any handle; nothing to do
        // here beyond letting queued work drain.
        Box::pin(async {})
    }

    fn configuration(&self) -> BoxFuture<'_, Result<Vec<IniSection>, SinkError>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            let rows: Vec<String> = send_cmd!(tx, |reply| DbCommand::Configuration { reply })?;
            Ok(ini::parse(&rows.join("\n")))
        })
    }

    fn store_configuration<'a>(
        &'a self,
        sections: &'a [IniSection],
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        let tx = self.tx.clone();
        let rows: Vec<(String, String)> = sections
            .iter()
            .map(|section| {
                (
                    section.name.clone(),
                    ini::serialize(std::slice::from_ref(section)),
                )
            })
            .collect();
        Box::pin(async move { send_cmd!(tx, |reply| DbCommand::StoreConfiguration { rows, reply }) })
    }

    fn ensure_tables<'a>(
        &'a self,
        specs: &'a [TableSpec],
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        let tx = self.tx.clone();
        let specs = specs.to_vec();
        Box::pin(async move { send_cmd!(tx, |reply| DbCommand::EnsureTables { specs, reply }) })
    }

    fn add_entry<'a>(
        &'a self,
        table: &'a str,
        row: &'a Row,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        let tx = self.tx.clone();
        let table = table.to_string();
        let row = row.clone();
        Box::pin(async move { send_cmd!(tx, |reply| DbCommand::AddEntry { table, row, reply }) })
    }

    fn log<'a>(
        &'a self,
        message: &'a str,
        is_error: bool,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        let tx = self.tx.clone();
        let message = message.to_string();
        Box::pin(async move {
            send_cmd!(tx, |reply| DbCommand::Log {
                message,
                is_error,
                reply,
            })
        })
    }

    fn is_archiver(&self) -> bool {
        true
    }

    fn snapshot<'a>(&'a self, date_tag: &'a str) -> BoxFuture<'a, Result<(), SinkError>> {
        let tx = self.tx.clone();
        let date_tag = date_tag.to_string();
        Box::pin(async move { send_cmd!(tx, |reply| DbCommand::Snapshot { date_tag, reply }) })
    }

    fn prune(&self, days: u32) -> BoxFuture<'_, Result<(), SinkError>> {
        let tx = self.tx.clone();
        Box::pin(async move { send_cmd!(tx, |reply| DbCommand::Prune { days, reply }) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use jidl_core::datatype::DataType;
    use jidl_core::sink::TIMESTAMP_COLUMN;
    use jidl_core::value::Value;

    fn press_spec() -> TableSpec {
        TableSpec {
            name: "press1".to_string(),
            columns: vec![
                ("speed".to_string(), DataType::Word),
                ("level".to_string(), DataType::Real),
            ],
        }
    }

    fn sample_row(ts: &str, speed: Option<i64>) -> Row {
        let mut row = Row::new();
        row.insert(TIMESTAMP_COLUMN, Value::Text(ts.to_string()));
        if let Some(speed) = speed {
            row.insert("speed", Value::Int(speed));
        }
        row.insert("level", Value::Float(1.5));
        row
    }

    fn raw_conn(dir: &tempfile::TempDir) -> Connection {
        Connection::open(dir.path().join("plant.db")).unwrap()
    }

    #[tokio::test]
    async fn rows_round_trip_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::new("plant", dir.path()).unwrap();
        sink.ensure_tables(&[press_spec()]).await.unwrap();

        sink.add_entry("press1", &sample_row("2024-05-01 13:30:02,417", Some(42)))
            .await
            .unwrap();

        let conn = raw_conn(&dir);
        let (ts, speed, level): (String, i64, f64) = conn
            .query_row(
                "SELECT TIMESTAMP, speed, level FROM 'press1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(ts, "2024-05-01 13:30:02,417");
        assert_eq!(speed, 42);
        assert_eq!(level, 1.5);
    }

    #[tokio::test]
    async fn absent_columns_default_to_null() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::new("plant", dir.path()).unwrap();
        sink.ensure_tables(&[press_spec()]).await.unwrap();

        sink.add_entry("press1", &sample_row("2024-05-01 13:30:03,000", None))
            .await
            .unwrap();

        let conn = raw_conn(&dir);
        let speed: Option<i64> = conn
            .query_row("SELECT speed FROM 'press1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(speed, None);
    }

    #[tokio::test]
    async fn column_order_is_stable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sink = SqliteSink::new("plant", dir.path()).unwrap();
            sink.ensure_tables(&[press_spec()]).await.unwrap();
        }

        // A second sink over the same file discovers the same headers and
        // accepts rows against them.
        let sink = SqliteSink::new("plant", dir.path()).unwrap();
        sink.open().await.unwrap();
        sink.add_entry("press1", &sample_row("2024-05-01 13:30:04,000", Some(7)))
            .await
            .unwrap();

        let conn = raw_conn(&dir);
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info('press1') ORDER BY cid")
            .unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(columns, [TIMESTAMP_COLUMN, "speed", "level"]);
    }

    #[tokio::test]
    async fn unknown_table_is_a_bad_row() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::new("plant", dir.path()).unwrap();
        sink.open().await.unwrap();
        let err = sink
            .add_entry("ghost", &sample_row("2024-05-01 13:30:05,000", Some(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::BadRow { .. }));
    }

    #[tokio::test]
    async fn diagnostics_rows_carry_the_error_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::new("plant", dir.path()).unwrap();
        sink.log("press1 connected", false).await.unwrap();
        sink.log("can't insert", true).await.unwrap();

        let conn = raw_conn(&dir);
        let mut stmt = conn
            .prepare("SELECT MESSAGE FROM 'JIDL Diagnostics' ORDER BY TIMESTAMP")
            .unwrap();
        let messages: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(messages.contains(&"press1 connected".to_string()));
        assert!(messages.contains(&"[E] can't insert".to_string()));
    }

    #[test]
    fn colliding_diagnostics_timestamps_retry_once() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("d.db")).unwrap();
        let builder = StatementBuilder::new(SqlDialect::Sqlite);
        conn.execute_batch(&builder.create_diagnostics_table()).unwrap();

        let ts = "2024-05-01 13:30:02,417";
        insert_log_at(&conn, &builder, ts, "first", false).unwrap();
        insert_log_at(&conn, &builder, ts, "second", false).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM 'JIDL Diagnostics'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
        let bumped: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM 'JIDL Diagnostics' WHERE TIMESTAMP = '2024-05-01 13:30:02,418'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bumped, 1);
    }

    #[tokio::test]
    async fn configuration_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::new("plant", dir.path()).unwrap();

        let sections = ini::parse(
            "[c]\ntype=json\naddress=http://127.0.0.1:8080/json\nseconds=1\n\
             [x::c]\naddress=foo\ntype=INTEGER\n",
        );
        sink.store_configuration(&sections).await.unwrap();
        let back = sink.configuration().await.unwrap();
        assert_eq!(back, sections);
    }

    #[tokio::test]
    async fn empty_configuration_is_an_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::new("plant", dir.path()).unwrap();
        assert!(sink.configuration().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_writes_a_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::new("plant", dir.path()).unwrap();
        sink.ensure_tables(&[press_spec()]).await.unwrap();

        sink.snapshot("2024-05-01").await.unwrap();
        assert!(dir.path().join("plant.db-2024-05-01.db").exists());
    }

    #[tokio::test]
    async fn prune_deletes_old_rows_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::new("plant", dir.path()).unwrap();
        sink.ensure_tables(&[press_spec()]).await.unwrap();

        sink.add_entry("press1", &sample_row("2000-01-01 00:00:00,000", Some(1)))
            .await
            .unwrap();
        let now = jidl_core::timefmt::now_string();
        sink.add_entry("press1", &sample_row(&now, Some(2)))
            .await
            .unwrap();
        sink.log("old enough to stay", false).await.unwrap();

        sink.prune(7).await.unwrap();

        let conn = raw_conn(&dir);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM 'press1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1, "only the fresh row survives");
        let diagnostics: i64 = conn
            .query_row("SELECT COUNT(*) FROM 'JIDL Diagnostics'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(diagnostics, 1, "fresh diagnostics survive the prune");
    }

    #[tokio::test]
    async fn sink_reports_archiver_support() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteSink::new("plant", dir.path()).unwrap();
        assert!(sink.is_archiver());
    }
}
