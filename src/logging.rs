//! # Structured Logging Module
//!
//! Environment-aware structured logging for the process store and the
//! coordinator-side components.

use crate::orchestration::retention::RetentionReport;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// `RUST_LOG` wins over the environment default. Set
/// `COLONIES_LOG_FORMAT=json` for JSON lines instead of human-readable output.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_format();

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A global subscriber may already be installed by the host application
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("COLONIES_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

fn use_json_format() -> bool {
    std::env::var("COLONIES_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log structured data for process lifecycle operations
pub fn log_process_operation(
    operation: &str,
    process_id: &str,
    colony_name: Option<&str>,
    executor_id: Option<&str>,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        process_id = %process_id,
        colony = colony_name,
        executor_id = executor_id,
        state = %state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "PROCESS_OPERATION"
    );
}

/// Log the outcome of one retention sweep
pub fn log_retention_sweep(period_seconds: i64, report: &RetentionReport) {
    tracing::info!(
        period_seconds,
        attributes = report.attributes,
        logs = report.logs,
        processes = report.processes,
        process_graphs = report.process_graphs,
        graph_processes = report.graph_processes,
        total = report.total(),
        timestamp = %Utc::now().to_rfc3339(),
        "RETENTION_SWEEP"
    );
}
