//! Tabular diagnostics.
//!
//! Samplers and the trainer record scalar key/value pairs into the current row
//! and `dump` closes it. What happens to a closed row depends on the logger.

use std::sync::{Arc, Mutex};
use tracing::info;

/// One closed row of diagnostics, in recording order.
pub type LogRow = Vec<(String, f32)>;

pub trait TabularLogger {
    fn record(&mut self, key: &str, value: f32);

    /// Close the current row.
    fn dump(&mut self);
}

fn upsert(row: &mut LogRow, key: &str, value: f32) {
    match row.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => row.push((key.to_string(), value)),
    }
}

/// Emits every dumped row as one `tracing` event.
#[derive(Debug, Default)]
pub struct TracingLogger {
    current: LogRow,
    rows_dumped: usize,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows_dumped(&self) -> usize {
        self.rows_dumped
    }
}

impl TabularLogger for TracingLogger {
    fn record(&mut self, key: &str, value: f32) {
        upsert(&mut self.current, key, value);
    }

    fn dump(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let row = self
            .current
            .drain(..)
            .map(|(k, v)| format!("{}={:.4}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        info!(target: "graphmarl::diagnostics", row = self.rows_dumped, "{}", row);
        self.rows_dumped += 1;
    }
}

/// Keeps dumped rows in memory. Clones share the same rows.
#[derive(Clone, Debug, Default)]
pub struct MemoryLogger {
    current: LogRow,
    rows: Arc<Mutex<Vec<LogRow>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<LogRow> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    /// Most recent dumped value for `key`.
    pub fn last(&self, key: &str) -> Option<f32> {
        self.rows()
            .iter()
            .rev()
            .find_map(|row| row.iter().find(|(k, _)| k == key).map(|(_, v)| *v))
    }
}

impl TabularLogger for MemoryLogger {
    fn record(&mut self, key: &str, value: f32) {
        upsert(&mut self.current, key, value);
    }

    fn dump(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let row = std::mem::take(&mut self.current);
        if let Ok(mut rows) = self.rows.lock() {
            rows.push(row);
        }
    }
}
