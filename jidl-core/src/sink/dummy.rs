//! A sink for exercising the logging pipeline without a database.
//!
//! Rows and diagnostics go to the process log and into an in-memory list
//! that tests (or a curious operator) can drain. The topology is read
//! from `<dir>/<name>.ini` instead of a configuration table.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::ini::{self, IniSection};
use crate::device::BoxFuture;
use crate::error::SinkError;
use crate::sink::{Row, Sink, TableSpec};

/// An in-memory, file-configured sink.
pub struct DummySink {
    config_path: PathBuf,
    entries: Mutex<Vec<(String, Row)>>,
    messages: Mutex<Vec<String>>,
}

impl DummySink {
    /// The configuration is expected at `<dir>/<name>.ini`.
    pub fn new(name: &str, dir: impl Into<PathBuf>) -> DummySink {
        let mut config_path = dir.into();
        config_path.push(format!("{name}.ini"));
        DummySink {
            config_path,
            entries: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Drains the recorded rows.
    pub fn take_entries(&self) -> Vec<(String, Row)> {
        std::mem::take(&mut self.entries.lock().unwrap())
    }

    /// Drains the recorded diagnostics messages.
    pub fn take_messages(&self) -> Vec<String> {
        std::mem::take(&mut self.messages.lock().unwrap())
    }
}

impl Sink for DummySink {
    fn open(&self) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn configuration(&self) -> BoxFuture<'_, Result<Vec<IniSection>, SinkError>> {
        Box::pin(async move {
            let text = std::fs::read_to_string(&self.config_path).map_err(|e| {
                SinkError::Backend(format!(
                    "cannot read {}: {e}",
                    self.config_path.display()
                ))
            })?;
            Ok(ini::parse(&text))
        })
    }

    fn store_configuration<'a>(
        &'a self,
        sections: &'a [IniSection],
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            std::fs::write(&self.config_path, ini::serialize(sections)).map_err(|e| {
                SinkError::Backend(format!(
                    "cannot write {}: {e}",
                    self.config_path.display()
                ))
            })
        })
    }

    fn ensure_tables<'a>(
        &'a self,
        _specs: &'a [TableSpec],
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async { Ok(()) })
    }

    fn add_entry<'a>(
        &'a self,
        table: &'a str,
        row: &'a Row,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            tracing::info!("dummy sink: {table}: {row:?}");
            self.entries
                .lock()
                .unwrap()
                .push((table.to_string(), row.clone()));
            Ok(())
        })
    }

    fn log<'a>(
        &'a self,
        message: &'a str,
        is_error: bool,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            if is_error {
                tracing::error!("dummy sink: {message}");
            } else {
                tracing::info!("dummy sink: {message}");
            }
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        })
    }

    fn snapshot<'a>(&'a self, _date_tag: &'a str) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async {
            Err(SinkError::Backend(
                "dummy sink does not support snapshots".to_string(),
            ))
        })
    }

    fn prune(&self, _retention_days: u32) -> BoxFuture<'_, Result<(), SinkError>> {
        Box::pin(async {
            Err(SinkError::Backend(
                "dummy sink does not support pruning".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[tokio::test]
    async fn configuration_comes_from_the_ini_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("t.ini"),
            "[c]\ntype=json\naddress=http://127.0.0.1:8080/json\nseconds=1\n",
        )
        .unwrap();

        let sink = DummySink::new("t", dir.path());
        let sections = sink.configuration().await.unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name, "c");
    }

    #[tokio::test]
    async fn missing_configuration_file_is_a_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DummySink::new("absent", dir.path());
        assert!(sink.configuration().await.is_err());
    }

    #[tokio::test]
    async fn entries_are_recorded_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DummySink::new("t", dir.path());

        let mut row = Row::new();
        row.insert("x", Value::Int(1));
        sink.add_entry("c", &row).await.unwrap();
        sink.add_entry("c", &row).await.unwrap();

        let entries = sink.take_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "c");
        assert!(sink.take_entries().is_empty());
    }
}
