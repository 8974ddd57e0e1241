//! In-memory executors for unit tests

use crate::config::ConnectionConfig;
use crate::db::{Connector, Database, QueryExecutor, RowSet};
use crate::error::{AppError, Result};
use crate::query::Query;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Answers reads from a script, in order, and records every call.
///
/// Reads past the end of the script return no rows.
#[derive(Default)]
pub struct ScriptedExecutor {
    reads: Mutex<VecDeque<Result<RowSet>>>,
    read_log: Mutex<Vec<String>>,
    write_log: Mutex<Vec<String>>,
    failing_writes: Mutex<HashSet<usize>>,
    write_attempts: Mutex<usize>,
    closes: Mutex<usize>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows for the next read
    pub fn push_rows(&self, rows: &[&str]) -> &Self {
        self.reads
            .lock()
            .unwrap()
            .push_back(Ok(rows.iter().map(|r| r.to_string()).collect()));
        self
    }

    /// Queue a failure for the next read
    pub fn push_error(&self, err: AppError) -> &Self {
        self.reads.lock().unwrap().push_back(Err(err));
        self
    }

    /// Make the write attempt with this zero-based index fail
    pub fn fail_write(&self, attempt: usize) -> &Self {
        self.failing_writes.lock().unwrap().insert(attempt);
        self
    }

    /// Text of every read, in order
    pub fn reads(&self) -> Vec<String> {
        self.read_log.lock().unwrap().clone()
    }

    /// Text of every successful write, in order
    pub fn writes(&self) -> Vec<String> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn write_attempts(&self) -> usize {
        *self.write_attempts.lock().unwrap()
    }

    pub fn closes(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn read(&self, query: &Query) -> Result<RowSet> {
        self.read_log.lock().unwrap().push(query.text().to_string());
        self.reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn write(&self, query: &Query) -> Result<()> {
        let attempt = {
            let mut attempts = self.write_attempts.lock().unwrap();
            *attempts += 1;
            *attempts - 1
        };
        if self.failing_writes.lock().unwrap().contains(&attempt) {
            return Err(AppError::QueryError(format!("write {} rejected", attempt)));
        }
        self.write_log.lock().unwrap().push(query.text().to_string());
        Ok(())
    }

    async fn close(&self) {
        *self.closes.lock().unwrap() += 1;
    }
}

/// Hands out scripted executors by connection URL, or fails to connect
#[derive(Default)]
pub struct ScriptedConnector {
    executors: Mutex<Vec<(String, Arc<ScriptedExecutor>)>>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve connections to `url` with `executor`; unknown URLs are refused
    pub fn serve(&self, url: &str, executor: Arc<ScriptedExecutor>) -> &Self {
        self.executors
            .lock()
            .unwrap()
            .push((url.to_string(), executor));
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, target: &ConnectionConfig, dry_run: bool) -> Result<Database> {
        let url = target.url.as_str().to_string();
        self.attempts.lock().unwrap().push(url.clone());

        let executors = self.executors.lock().unwrap();
        let executor = executors
            .iter()
            .find(|(served, _)| *served == url)
            .map(|(_, executor)| executor.clone())
            .ok_or_else(|| AppError::ConnectionError(format!("{} refused the connection", url)))?;

        Ok(Database::with_executor(executor, url, dry_run))
    }
}
