use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Structured event log for pipeline runs.
///
/// Every event carries `type`, `request_id` and `ts`; the caller payload is merged
/// last and can override them. The file sink writes one compact JSON object per
/// line; the memory sink keeps events for inspection in tests and embedding hosts.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    sink: EventSink,
    request_id: String,
}

/// Sinks are shared by every writer derived through [`EventWriter::for_request`].
#[derive(Debug, Clone)]
enum EventSink {
    File {
        path: PathBuf,
        lock: Arc<Mutex<()>>,
    },
    Memory(Arc<Mutex<Vec<Value>>>),
    Disabled,
}

impl EventWriter {
    pub fn to_file(path: impl Into<PathBuf>, request_id: impl Into<String>) -> Self {
        Self::with_sink(
            EventSink::File {
                path: path.into(),
                lock: Arc::new(Mutex::new(())),
            },
            request_id.into(),
        )
    }

    pub fn in_memory(request_id: impl Into<String>) -> Self {
        Self::with_sink(
            EventSink::Memory(Arc::new(Mutex::new(Vec::new()))),
            request_id.into(),
        )
    }

    pub fn disabled() -> Self {
        Self::with_sink(EventSink::Disabled, String::new())
    }

    fn with_sink(sink: EventSink, request_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner { sink, request_id }),
        }
    }

    /// Same sink, different request id.
    pub fn for_request(&self, request_id: impl Into<String>) -> Self {
        Self::with_sink(self.inner.sink.clone(), request_id.into())
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.inner.sink {
            EventSink::File { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "request_id".to_string(),
            Value::String(self.inner.request_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        let event = Value::Object(event);

        match &self.inner.sink {
            EventSink::Disabled => {}
            EventSink::Memory(recorded) => {
                recorded
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?
                    .push(event.clone());
            }
            EventSink::File { path, lock } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let line = serde_json::to_string(&event)?;
                let _guard = lock
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
        }

        Ok(event)
    }

    /// Emit, swallowing sink failures. Observability must not fail a generation.
    pub fn note(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            eprintln!("vitrine: dropped {event_type} event: {err:#}");
        }
    }

    /// Events kept by the memory sink, oldest first.
    pub fn recorded(&self) -> Vec<Value> {
        match &self.inner.sink {
            EventSink::Memory(recorded) => recorded
                .lock()
                .map(|events| events.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn recorded_types(&self) -> Vec<String> {
        self.recorded()
            .iter()
            .filter_map(|event| event.get("type").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
