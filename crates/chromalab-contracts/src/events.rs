use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for the session's `events.jsonl`.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = EventPayload::from_iter([
            ("type".to_string(), Value::String(event_type.to_string())),
            (
                "session_id".to_string(),
                Value::String(self.inner.session_id.clone()),
            ),
            ("ts".to_string(), Value::String(now_utc_iso())),
        ]);
        event.extend(payload);
        self.append(event)
    }

    /// Records a pipeline failure with its log-level kind; format errors and
    /// transport errors stay distinguishable here even though the user sees
    /// one message.
    pub fn emit_error(&self, event_type: &str, kind: &str, detail: &str) -> anyhow::Result<Value> {
        self.emit(
            event_type,
            EventPayload::from_iter([
                ("error_kind".to_string(), Value::String(kind.to_string())),
                ("detail".to_string(), Value::String(detail.to_string())),
            ]),
        )
    }

    fn append(&self, event: EventPayload) -> anyhow::Result<Value> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&event)?;

        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        writeln!(file, "{line}")?;

        Ok(Value::Object(event))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        let mut payload = EventPayload::new();
        payload.insert("phase".to_string(), Value::String("analyzing".to_string()));
        let emitted = writer.emit("auto_plan_phase", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("auto_plan_phase".to_string()));
        assert_eq!(parsed["session_id"], Value::String("session-123".to_string()));
        assert_eq!(parsed["phase"], Value::String("analyzing".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn emit_appends_and_error_events_carry_their_kind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-123");

        writer.emit("auto_plan_started", EventPayload::new())?;
        writer.emit_error("auto_plan_failed", "analysis_format", "steps missing")?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(second["error_kind"], Value::String("analysis_format".to_string()));
        assert_eq!(second["detail"], Value::String("steps missing".to_string()));
        Ok(())
    }
}
