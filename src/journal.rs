//! JSON-lines record of lifecycle transitions.

use crate::error::PrintError;
use crate::job::PrintJob;
use crate::lifecycle::LifecycleState;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct JobJournal {
    inner: Arc<Mutex<JournalState>>,
}

struct JournalState {
    sink: JournalSink,
    counters: BTreeMap<String, u64>,
}

enum JournalSink {
    File(BufWriter<File>),
    Memory(Vec<String>),
}

impl JobJournal {
    pub fn to_file(path: impl AsRef<Path>) -> Result<Self, PrintError> {
        let file = File::create(path)?;
        Ok(Self::with_sink(JournalSink::File(BufWriter::new(file))))
    }

    pub fn in_memory() -> Self {
        Self::with_sink(JournalSink::Memory(Vec::new()))
    }

    fn with_sink(sink: JournalSink) -> Self {
        Self {
            inner: Arc::new(Mutex::new(JournalState {
                sink,
                counters: BTreeMap::new(),
            })),
        }
    }

    pub fn transition(&self, job: &PrintJob, state: LifecycleState) {
        self.write(json!({
            "type": "lifecycle.transition",
            "job": job.id.0,
            "kind": job.kind().as_str(),
            "fingerprint": job.fingerprint,
            "state": state.as_str(),
        }));
        self.increment(&format!("state.{}", state.as_str()), 1);
    }

    pub fn outcome(&self, job: &PrintJob, outcome: &str, detail: Option<&str>) {
        self.write(json!({
            "type": "lifecycle.outcome",
            "job": job.id.0,
            "kind": job.kind().as_str(),
            "outcome": outcome,
            "detail": detail,
        }));
        self.increment(&format!("outcome.{outcome}"), 1);
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    /// Writes the counters accumulated so far and resets them.
    pub fn emit_summary(&self, context: &str) {
        let counts = match self.inner.lock() {
            Ok(mut state) => std::mem::take(&mut state.counters),
            Err(_) => return,
        };
        self.write(json!({
            "type": "journal.summary",
            "context": context,
            "counts": counts,
        }));
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            if let JournalSink::File(writer) = &mut state.sink {
                let _ = writer.flush();
            }
        }
    }

    /// Lines written so far; empty for file-backed journals.
    pub fn lines(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(state) => match &state.sink {
                JournalSink::Memory(lines) => lines.clone(),
                JournalSink::File(_) => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }

    fn write(&self, value: Value) {
        let line = value.to_string();
        if let Ok(mut state) = self.inner.lock() {
            match &mut state.sink {
                JournalSink::File(writer) => {
                    let _ = writeln!(writer, "{line}");
                }
                JournalSink::Memory(lines) => lines.push(line),
            }
        }
    }
}
