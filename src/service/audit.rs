//! Forensic audit trail
//!
//! Every processing outcome is emitted as one JSON record on the `audit`
//! tracing target. When an audit directory is configured, [`file_layer`]
//! routes that target to `{audit_dir}/audit.jsonl` through a non-blocking
//! appender, one record per line.
//! Inputs are never stored verbatim: only a SHA-256 hash and a short preview.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

pub const AUDIT_TARGET: &str = "audit";
pub const AUDIT_FILE_NAME: &str = "audit.jsonl";
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    SystemStart,
    JobPublished,
    JobReceived,
    AnalysisStart,
    ThreatDetected,
    AnalysisComplete,
    JobError,
    JobSkipped,
    BriefingPublished,
    SystemStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: DateTime<Utc>,
    service_name: &'a str,
    event_type: AuditEvent,
    severity: AuditSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_preview: Option<String>,
    #[serde(flatten)]
    details: Map<String, Value>,
}

pub struct AuditLogger {
    service_name: String,
}

impl AuditLogger {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }

    pub fn hash_input(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    pub fn preview(text: &str) -> String {
        match text.char_indices().nth(PREVIEW_CHARS) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.to_string(),
        }
    }

    /// Serialize one audit record as a single JSON line
    fn render(
        &self,
        event: AuditEvent,
        severity: AuditSeverity,
        input: Option<&str>,
        details: Value,
    ) -> serde_json::Result<String> {
        let details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("details".to_string(), other);
                map
            }
        };

        serde_json::to_string(&AuditRecord {
            timestamp: Utc::now(),
            service_name: &self.service_name,
            event_type: event,
            severity,
            input_hash: input.map(Self::hash_input),
            input_preview: input.map(Self::preview),
            details,
        })
    }

    /// Record an event. Serialization failures are logged and swallowed.
    pub fn log(
        &self,
        event: AuditEvent,
        severity: AuditSeverity,
        input: Option<&str>,
        details: Value,
    ) {
        let line = match self.render(event, severity, input, details) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize audit record");
                return;
            }
        };

        match severity {
            AuditSeverity::Info => tracing::info!(target: AUDIT_TARGET, "{}", line),
            AuditSeverity::Warn | AuditSeverity::Critical => {
                tracing::warn!(target: AUDIT_TARGET, "{}", line)
            }
        }
    }

    pub fn info(&self, event: AuditEvent, input: Option<&str>, details: Value) {
        self.log(event, AuditSeverity::Info, input, details);
    }

    pub fn warn(&self, event: AuditEvent, input: Option<&str>, details: Value) {
        self.log(event, AuditSeverity::Warn, input, details);
    }
}

/// Writes the event message and nothing else; audit messages are already
/// complete JSON records.
pub struct AuditLineFormat;

impl<S, N> FormatEvent<S, N> for AuditLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut message = MessageVisitor::default();
        event.record(&mut message);
        writeln!(writer, "{}", message.0)
    }
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0 = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

/// File layer for the `audit` target, appending to `{dir}/audit.jsonl`.
///
/// The returned guard flushes the background writer when dropped and must be
/// held for the life of the process.
pub fn file_layer<S>(
    dir: &Path,
) -> Result<(impl Layer<S> + Send + Sync + 'static, WorkerGuard), InitError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(AUDIT_FILE_NAME)
        .build(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(AuditLineFormat)
        .with_writer(writer)
        .with_filter(Targets::new().with_target(AUDIT_TARGET, Level::INFO));

    Ok((layer, guard))
}
