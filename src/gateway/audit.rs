//! Structured audit events for authentication transitions.
//!
//! Each event is a flat JSON object written on its own log line. The sink is
//! write-only: nothing in the gateway reads events back.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::sync::{Arc, Mutex};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    Layer,
    filter::filter_fn,
    fmt::{self, MakeWriter},
    registry::LookupSpan,
};

pub const UNKNOWN: &str = "unknown";

/// `tracing` target of every audit record.
pub const AUDIT_TARGET: &str = "audit";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    UserLogin,
    LoginFailed,
    LoginError,
    UserLogout,
    UnauthorizedAccess,
    ProtectedRouteAccess,
}

impl AuditEventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserLogin => "user_login",
            Self::LoginFailed => "login_failed",
            Self::LoginError => "login_error",
            Self::UserLogout => "user_logout",
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::ProtectedRouteAccess => "protected_route_access",
        }
    }

    /// Denied access and failed logins are warnings, everything else is informational.
    #[must_use]
    pub const fn level(self) -> Level {
        match self {
            Self::UnauthorizedAccess | Self::LoginFailed => Level::WARN,
            _ => Level::INFO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    event_type: AuditEventType,
    #[serde(serialize_with = "serialize_timestamp")]
    timestamp: DateTime<Utc>,
    ip_address: Option<String>,
    user_id: String,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&rfc3339(ts))
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl AuditEvent {
    /// New event stamped with the current time. `user_id` and `email` start as `"unknown"`.
    #[must_use]
    pub fn new(event_type: AuditEventType, ip_address: Option<String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            ip_address,
            user_id: UNKNOWN.to_string(),
            email: UNKNOWN.to_string(),
            path: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>, email: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.email = email.into();
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn event_type(&self) -> AuditEventType {
        self.event_type
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Flat JSON rendering used on the wire.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Destination for audit events. Implementations must not panic.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

// Both levels share one field list; tracing needs the level at the call site.
macro_rules! emit_audit {
    ($level:ident, $event:expr) => {{
        let event: &AuditEvent = $event;
        let timestamp = rfc3339(&event.timestamp);
        tracing::$level!(
            target: AUDIT_TARGET,
            event_type = event.event_type.as_str(),
            timestamp = timestamp.as_str(),
            ip_address = event.ip_address.as_deref(),
            user_id = event.user_id.as_str(),
            email = event.email.as_str(),
            path = event.path.as_deref(),
            error = event.error.as_deref()
        );
    }};
}

/// Writes events through `tracing` under the [`AUDIT_TARGET`] target, one
/// structured field per audit attribute.
#[derive(Clone, Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &AuditEvent) {
        if event.event_type.level() == Level::WARN {
            emit_audit!(warn, event);
        } else {
            emit_audit!(info, event);
        }
    }
}

/// Formatting layer for the audit target: one flat JSON object per line with
/// the audit fields plus `level`. Other targets are ignored.
pub fn audit_layer<S, W>(writer: W) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(false)
        .with_span_list(false)
        .without_time()
        .with_target(false)
        .with_level(true)
        .with_writer(writer)
        .with_filter(filter_fn(|meta| meta.target() == AUDIT_TARGET))
}

/// In-memory audit trail, handy for tests and embedding.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.events()
            .iter()
            .filter(|event| event.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: &AuditEvent) {
        // A poisoned lock drops the event rather than taking the request down.
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Handle shared by all handlers.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn log_event(&self, event: AuditEvent) {
        self.sink.record(&event);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn severity_policy() {
        assert_eq!(AuditEventType::UnauthorizedAccess.level(), Level::WARN);
        assert_eq!(AuditEventType::LoginFailed.level(), Level::WARN);
        assert_eq!(AuditEventType::UserLogin.level(), Level::INFO);
        assert_eq!(AuditEventType::LoginError.level(), Level::INFO);
        assert_eq!(AuditEventType::UserLogout.level(), Level::INFO);
        assert_eq!(AuditEventType::ProtectedRouteAccess.level(), Level::INFO);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn event_serializes_flat() {
        let event = AuditEvent::new(AuditEventType::LoginFailed, Some("10.0.0.1".to_string()))
            .with_path("/callback")
            .with_error("CSRF state mismatch");

        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object["event_type"], "login_failed");
        assert_eq!(object["ip_address"], "10.0.0.1");
        assert_eq!(object["user_id"], "unknown");
        assert_eq!(object["email"], "unknown");
        assert_eq!(object["path"], "/callback");
        assert_eq!(object["error"], "CSRF state mismatch");
        assert!(object["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(object.values().all(|v| !v.is_object() && !v.is_array()));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn optional_fields_are_omitted() {
        let event = AuditEvent::new(AuditEventType::UserLogin, None).with_user("u1", "a@b.com");
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        let object = value.as_object().unwrap();

        assert!(!object.contains_key("path"));
        assert!(!object.contains_key("error"));
        assert_eq!(object["ip_address"], Value::Null);
        assert_eq!(object["user_id"], "u1");
        assert_eq!(object["email"], "a@b.com");
    }

    #[test]
    fn event_type_names_match_serde() {
        for kind in [
            AuditEventType::UserLogin,
            AuditEventType::LoginFailed,
            AuditEventType::LoginError,
            AuditEventType::UserLogout,
            AuditEventType::UnauthorizedAccess,
            AuditEventType::ProtectedRouteAccess,
        ] {
            let json = serde_json::to_value(kind).ok();
            assert_eq!(json.as_ref().and_then(Value::as_str), Some(kind.as_str()));
        }
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        let log = AuditLog::new(Arc::new(sink.clone()));

        log.log_event(
            AuditEvent::new(AuditEventType::UnauthorizedAccess, None).with_path("/protected"),
        );
        log.log_event(AuditEvent::new(AuditEventType::UserLogout, None));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), AuditEventType::UnauthorizedAccess);
        assert_eq!(events[0].path(), Some("/protected"));
        assert_eq!(sink.count(AuditEventType::UserLogout), 1);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn tracing_sink_does_not_panic_without_subscriber() {
        let log = AuditLog::default();
        log.log_event(AuditEvent::new(AuditEventType::LoginFailed, None).with_error("boom"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut bytes) = self.0.lock() {
                bytes.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
            String::from_utf8_lossy(&bytes)
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect()
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Value> {
        use tracing_subscriber::layer::SubscriberExt;

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber =
            tracing_subscriber::Registry::default().with(audit_layer(move || writer.clone()));
        tracing::subscriber::with_default(subscriber, f);
        captured.lines()
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn tracing_sink_writes_flat_json_lines() {
        let lines = capture(|| {
            TracingSink.record(
                &AuditEvent::new(AuditEventType::LoginFailed, Some("10.0.0.1".to_string()))
                    .with_path("/callback")
                    .with_error("CSRF state mismatch"),
            );
            tracing::info!("not an audit record");
        });

        assert_eq!(lines.len(), 1);
        let object = lines[0].as_object().unwrap();
        assert_eq!(object["event_type"], "login_failed");
        assert_eq!(object["ip_address"], "10.0.0.1");
        assert_eq!(object["user_id"], "unknown");
        assert_eq!(object["email"], "unknown");
        assert_eq!(object["path"], "/callback");
        assert_eq!(object["error"], "CSRF state mismatch");
        assert!(object["timestamp"].as_str().unwrap().ends_with('Z'));
        assert!(!object.contains_key("fields"));
        assert!(object.values().all(|v| !v.is_object() && !v.is_array()));
    }

    #[test]
    fn tracing_sink_levels_follow_event_type() {
        let lines = capture(|| {
            let log = AuditLog::default();
            log.log_event(AuditEvent::new(AuditEventType::UnauthorizedAccess, None));
            log.log_event(AuditEvent::new(AuditEventType::LoginFailed, None));
            log.log_event(
                AuditEvent::new(AuditEventType::UserLogin, None).with_user("u1", "a@b.com"),
            );
        });

        let levels: Vec<(&str, &str)> = lines
            .iter()
            .filter_map(|line| Some((line["event_type"].as_str()?, line["level"].as_str()?)))
            .collect();
        assert_eq!(
            levels,
            vec![
                ("unauthorized_access", "WARN"),
                ("login_failed", "WARN"),
                ("user_login", "INFO"),
            ]
        );
    }
}
