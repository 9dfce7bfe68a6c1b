use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Field names whose values never reach the log database.
const REDACTED_FIELDS: &[&str] = &[
    "content",
    "plaintext",
    "message_text",
    "title",
    "notes",
    "token",
    "salt",
    "key",
    "secret",
    "api_key",
];

const REDACTED: &str = "[redacted]";

/// A log record persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub span_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// Filters for reading persisted logs back.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink for warn+ records.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 span_id TEXT,
                 user_id TEXT,
                 conversation_id TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_user ON logs(user_id);
             CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, entry: &LogEntry) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, span_id, user_id, conversation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                entry.timestamp,
                entry.level,
                entry.target,
                entry.message,
                entry.fields,
                entry.span_id,
                entry.user_id,
                entry.conversation_id,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, span_id, user_id, conversation_id
             FROM logs WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        let mut push = |clause: &str, value: String| {
            sql.push_str(&format!(" AND {clause} ?{}", params.len() + 1));
            params.push(Box::new(value));
        };
        if let Some(level) = &q.level {
            push("level =", level.to_uppercase());
        }
        if let Some(target) = &q.target {
            push("target LIKE", format!("%{target}%"));
        }
        if let Some(user_id) = &q.user_id {
            push("user_id =", user_id.clone());
        }
        if let Some(conversation_id) = &q.conversation_id {
            push("conversation_id =", conversation_id.clone());
        }
        if let Some(since) = &q.since {
            push("timestamp >=", since.clone());
        }

        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                span_id: row.get(6)?,
                user_id: row.get(7)?,
                conversation_id: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }

    /// Delete records older than `days`. Returns the number removed.
    pub fn prune(&self, days: u32) -> Result<usize, rusqlite::Error> {
        let cutoff = (Utc::now() - Duration::days(i64::from(days)))
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let conn = self.conn.lock();
        conn.execute("DELETE FROM logs WHERE timestamp < ?1", [cutoff])
    }
}

struct LogEntry {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    span_id: Option<String>,
    user_id: Option<String>,
    conversation_id: Option<String>,
}

/// tracing Layer that writes warn+ events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    user_id: Option<String>,
    conversation_id: Option<String>,
}

impl FieldVisitor {
    fn put(&mut self, name: &str, value: serde_json::Value) {
        let value = if REDACTED_FIELDS.contains(&name) {
            serde_json::Value::String(REDACTED.into())
        } else {
            value
        };
        self.fields.insert(name.to_string(), value);
    }

    fn put_text(&mut self, name: &str, text: String) {
        match name {
            "message" => self.message = Some(text),
            "user_id" => self.user_id = Some(text),
            "conversation_id" => self.conversation_id = Some(text),
            other => self.put(other, serde_json::Value::String(text)),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        let text = match field.name() {
            "message" => text,
            _ => text.trim_matches('"').to_string(),
        };
        self.put_text(field.name(), text);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put_text(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field.name(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field.name(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field.name(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field.name(), value.into());
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        // Ids recorded on an enclosing span apply to events inside it.
        if visitor.user_id.is_none() || visitor.conversation_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(ids) = extensions.get::<SpanIds>() {
                        if visitor.user_id.is_none() {
                            visitor.user_id.clone_from(&ids.user_id);
                        }
                        if visitor.conversation_id.is_none() {
                            visitor.conversation_id.clone_from(&ids.conversation_id);
                        }
                    }
                }
            }
        }

        let span_id = ctx
            .event_scope(event)
            .and_then(|mut scope| scope.next())
            .map(|span| format!("{:?}", span.id()));

        let fields = (!visitor.fields.is_empty())
            .then(|| serde_json::to_string(&visitor.fields).unwrap_or_default());

        self.sink.insert(&LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            span_id,
            user_id: visitor.user_id,
            conversation_id: visitor.conversation_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if visitor.user_id.is_some() || visitor.conversation_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanIds {
                    user_id: visitor.user_id,
                    conversation_id: visitor.conversation_id,
                });
            }
        }
    }
}

struct SpanIds {
    user_id: Option<String>,
    conversation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn entry(ts: &str, level: &str, target: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: ts.into(),
            level: level.into(),
            target: target.into(),
            message: message.into(),
            fields: None,
            span_id: None,
            user_id: None,
            conversation_id: None,
        }
    }

    fn with_layer<F: FnOnce()>(f: F) -> Arc<SqliteLogSink> {
        let sink = Arc::new(SqliteLogSink::in_memory().unwrap());
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, f);
        sink
    }

    #[test]
    fn file_sink_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteLogSink::new(&dir.path().join("nested/logs.db")).unwrap();
        sink.insert(&entry("2026-02-14T12:00:00Z", "WARN", "abrigo_llm", "rate limited"));
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn query_filters() {
        let sink = SqliteLogSink::in_memory().unwrap();
        let mut a = entry("2026-02-14T11:00:00Z", "WARN", "abrigo_llm::anthropic", "old");
        a.user_id = Some("user_a".into());
        let mut b = entry("2026-02-14T13:00:00Z", "ERROR", "abrigo_store::messages", "new");
        b.conversation_id = Some("conv_b".into());
        sink.insert(&a);
        sink.insert(&b);

        let by_level = sink.query(&LogQuery { level: Some("error".into()), ..Default::default() }).unwrap();
        assert_eq!(by_level.len(), 1);
        assert_eq!(by_level[0].message, "new");

        let by_target = sink.query(&LogQuery { target: Some("anthropic".into()), ..Default::default() }).unwrap();
        assert_eq!(by_target[0].message, "old");

        let by_user = sink.query(&LogQuery { user_id: Some("user_a".into()), ..Default::default() }).unwrap();
        assert_eq!(by_user.len(), 1);

        let by_conv = sink
            .query(&LogQuery { conversation_id: Some("conv_b".into()), ..Default::default() })
            .unwrap();
        assert_eq!(by_conv[0].message, "new");

        let since = sink
            .query(&LogQuery { since: Some("2026-02-14T12:00:00Z".into()), ..Default::default() })
            .unwrap();
        assert_eq!(since.len(), 1);
    }

    #[test]
    fn query_limit_newest_first() {
        let sink = SqliteLogSink::in_memory().unwrap();
        for i in 0..10 {
            sink.insert(&entry(&format!("2026-02-14T12:00:{i:02}Z"), "WARN", "t", &format!("msg {i}")));
        }
        let results = sink.query(&LogQuery { limit: Some(3), ..Default::default() }).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].message, "msg 9");
    }

    #[test]
    fn prune_removes_old_records() {
        let sink = SqliteLogSink::in_memory().unwrap();
        sink.insert(&entry("2020-01-01T00:00:00Z", "WARN", "t", "ancient"));
        sink.insert(&entry(&Utc::now().to_rfc3339(), "WARN", "t", "fresh"));
        assert_eq!(sink.prune(7).unwrap(), 1);
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn layer_persists_warn_and_above_only() {
        let sink = with_layer(|| {
            tracing::info!("routine");
            tracing::warn!(attempt = 2, "completion retry");
            tracing::error!("store failure");
        });
        assert_eq!(sink.count().unwrap(), 2);
        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records[1].message, "completion retry");
        assert_eq!(records[1].fields.as_deref(), Some(r#"{"attempt":2}"#));
    }

    #[test]
    fn layer_inherits_ids_from_span() {
        let sink = with_layer(|| {
            let span = tracing::info_span!("pipeline", user_id = "user_1", conversation_id = "conv_1");
            let _guard = span.enter();
            tracing::warn!("title update failed");
        });
        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records[0].user_id.as_deref(), Some("user_1"));
        assert_eq!(records[0].conversation_id.as_deref(), Some("conv_1"));
    }

    #[test]
    fn layer_redacts_sensitive_fields() {
        let sink = with_layer(|| {
            tracing::warn!(content = "ele me ameaçou", token = "eyJ...", status = 500, "bad things");
        });
        let fields = sink.query(&LogQuery::default()).unwrap()[0].fields.clone().unwrap();
        assert!(!fields.contains("ameaçou"));
        assert!(!fields.contains("eyJ"));
        assert!(fields.contains(REDACTED));
        assert!(fields.contains("500"));
    }
}
