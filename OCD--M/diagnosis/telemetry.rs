use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};

/// Builder for diagnosis telemetry handles.
pub struct DiagnosisTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    sinks: Vec<Arc<dyn LogSink>>,
    min_level: LogLevel,
}

impl DiagnosisTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            sinks: Vec::new(),
            min_level: LogLevel::Debug,
        }
    }

    /// Appends JSON lines to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Adds an extra sink (e.g. an in-memory one).
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<DiagnosisTelemetry> {
        let mut sinks = self.sinks;
        if let Some(path) = self.log_path {
            sinks.push(Arc::new(JsonLogger::new(path)?));
        }
        Ok(DiagnosisTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sinks,
                min_level: self.min_level,
            }),
        })
    }
}

/// Telemetry handle shared by the trainer, predictor and session.
#[derive(Clone)]
pub struct DiagnosisTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for DiagnosisTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosisTelemetry")
            .field("module", &self.inner.module)
            .field("sinks", &self.inner.sinks.len())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    sinks: Vec<Arc<dyn LogSink>>,
    min_level: LogLevel,
}

impl DiagnosisTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> DiagnosisTelemetryBuilder {
        DiagnosisTelemetryBuilder::new(module)
    }

    /// Logs structured metadata to every sink.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if level < self.inner.min_level || self.inner.sinks.is_empty() {
            return Ok(());
        }
        let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
        for sink in &self.inner.sinks {
            sink.write(&record)?;
        }
        Ok(())
    }
}

/// Logs through an optional handle, ignoring sink failures.
pub(crate) fn log(
    telemetry: Option<&DiagnosisTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_logging::MemorySink;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_file_and_memory_sinks() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("diagnosis.log");
        let memory = Arc::new(MemorySink::new());
        let telemetry = DiagnosisTelemetry::builder("trainer")
            .log_path(&path)
            .sink(memory.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "trainer.fit_complete", json!({ "trees": 100 }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("trainer.fit_complete"));
        assert_eq!(memory.snapshot()[0].metadata["trees"], json!(100));
    }

    #[test]
    fn min_level_filters_records() {
        let memory = Arc::new(MemorySink::new());
        let telemetry = DiagnosisTelemetry::builder("predictor")
            .sink(memory.clone())
            .min_level(LogLevel::Warn)
            .build()
            .unwrap();
        telemetry.log(LogLevel::Info, "predictor.ok", json!({})).unwrap();
        telemetry.log(LogLevel::Error, "predictor.failed", json!({})).unwrap();
        assert!(!memory.contains("predictor.ok"));
        assert!(memory.contains("predictor.failed"));
    }
}
