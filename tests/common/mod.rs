//! Shared helpers for integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use switchyard::application::errors::SessionError;
use switchyard::domain::traits::{ChatSession, SessionInfo};

#[derive(Debug, Clone)]
pub struct Record {
    pub level: Level,
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn message(&self) -> &str {
        self.field("message").unwrap_or_default()
    }
}

#[derive(Clone, Default)]
pub struct Records(Arc<Mutex<Vec<Record>>>);

impl Records {
    /// Every captured record with this message
    pub fn with_message(&self, message: &str) -> Vec<Record> {
        self.0
            .lock()
            .iter()
            .filter(|r| r.message() == message)
            .cloned()
            .collect()
    }
}

struct Capture(Records);

#[derive(Default)]
struct FieldVisitor(BTreeMap<String, String>);

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        (self.0).0.lock().push(Record {
            level: *event.metadata().level(),
            fields: visitor.0,
        });
    }
}

/// Capture every event emitted on this thread while the guard lives
pub fn capture_logs() -> (Records, DefaultGuard) {
    let records = Records::default();
    let subscriber = tracing_subscriber::registry().with(Capture(records.clone()));
    let guard = tracing::subscriber::set_default(subscriber);
    (records, guard)
}

/// Chat session that keeps every message it is asked to send
#[derive(Default)]
pub struct RecordingSession {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSession {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatSession for RecordingSession {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, SessionError> {
        let mut sent = self.sent.lock();
        sent.push((chat_id.to_string(), text.to_string()));
        Ok(sent.len().to_string())
    }

    fn session_info(&self) -> SessionInfo {
        SessionInfo {
            id: "test".to_string(),
            name: "test".to_string(),
            username: "switchyard_bot".to_string(),
        }
    }
}
