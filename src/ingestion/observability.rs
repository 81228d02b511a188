use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};

use crate::error::IngestionError;

use super::unified::IngestionFormat;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IngestionSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (load failed).
    Error,
    /// Critical error (typically I/O or other infrastructure failures).
    Critical,
}

/// Context about a load attempt.
#[derive(Debug, Clone)]
pub struct IngestionContext {
    /// File path, or a short label for inline sources.
    pub source: String,
    /// Format used for ingestion.
    pub format: IngestionFormat,
}

/// Stats reported on a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    pub rows: usize,
    pub columns: usize,
}

/// Observer interface for load outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait IngestionObserver: Send + Sync {
    /// Called when a load succeeds.
    fn on_success(&self, _ctx: &IngestionContext, _stats: IngestionStats) {}

    /// Called when a load fails.
    fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &IngestionError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn IngestionObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn IngestionObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl IngestionObserver for CompositeObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits load events as `tracing` events (`info` on success, `warn`/`error` on failure).
#[derive(Debug, Default)]
pub struct TracingObserver;

impl IngestionObserver for TracingObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        tracing::info!(
            format = %ctx.format,
            source = %ctx.source,
            rows = stats.rows,
            columns = stats.columns,
            "loaded table"
        );
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        if severity >= IngestionSeverity::Error {
            tracing::error!(?severity, format = %ctx.format, source = %ctx.source, %error, "load failed");
        } else {
            tracing::warn!(?severity, format = %ctx.format, source = %ctx.source, %error, "load failed");
        }
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        tracing::error!(alert = true, ?severity, format = %ctx.format, source = %ctx.source, %error, "load failed");
    }
}

/// Appends load events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{} {line}", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        }
    }
}

impl IngestionObserver for FileObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        self.append_line(&format!(
            "ok format={} source={} rows={} columns={}",
            ctx.format, ctx.source, stats.rows, stats.columns
        ));
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.append_line(&format!(
            "fail severity={severity:?} format={} source={} err={error}",
            ctx.format, ctx.source
        ));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &IngestionError) {
        self.append_line(&format!(
            "ALERT severity={severity:?} format={} source={} err={error}",
            ctx.format, ctx.source
        ));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{
        CompositeObserver, FileObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats,
        TracingObserver,
    };
    use crate::error::IngestionError;
    use crate::ingestion::IngestionFormat;

    #[derive(Default)]
    struct Counting {
        failures: AtomicUsize,
    }

    impl IngestionObserver for Counting {
        fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &IngestionError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ctx() -> IngestionContext {
        IngestionContext {
            source: "people.csv".to_string(),
            format: IngestionFormat::Csv,
        }
    }

    #[test]
    fn composite_fans_out_and_alerts_fall_back_to_failures() {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let log = std::env::temp_dir().join(format!("tabular-transforms-observer-{nanos}.log"));
        let counting = Arc::new(Counting::default());
        let composite = CompositeObserver::new(vec![
            counting.clone(),
            Arc::new(FileObserver::new(&log)),
            Arc::new(TracingObserver),
        ]);

        let error = IngestionError::SchemaMismatch {
            message: "missing required column 'id'".to_string(),
        };
        composite.on_success(&ctx(), IngestionStats { rows: 3, columns: 2 });
        composite.on_failure(&ctx(), IngestionSeverity::Error, &error);
        composite.on_alert(&ctx(), IngestionSeverity::Critical, &error);

        // `Counting` has no `on_alert`, so the alert lands in `on_failure`.
        assert_eq!(counting.failures.load(Ordering::SeqCst), 2);

        let written = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("ok format=csv source=people.csv rows=3 columns=2"));
        assert!(lines[1].contains("fail severity=Error"));
        assert!(lines[2].contains("ALERT severity=Critical"));
        let _ = std::fs::remove_file(log);
    }
}
