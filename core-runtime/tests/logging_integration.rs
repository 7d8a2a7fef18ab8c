//! Integration tests for logging system

use bridge_traits::error::Result as SinkResult;
use bridge_traits::logging::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_runtime::Error;
use mockall::mock;
use std::sync::Arc;

mock! {
    Sink {}

    impl LoggerSink for Sink {
        fn log(&self, entry: LogEntry) -> SinkResult<()>;
        fn flush(&self) -> SinkResult<()>;
        fn min_level(&self) -> LogLevel;
    }
}

#[test]
fn test_format_selection() {
    // Debug builds should default to Pretty
    #[cfg(debug_assertions)]
    {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
    }

    // Release builds should default to JSON
    #[cfg(not(debug_assertions))]
    {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Json);
    }
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
    assert!(config.logger_sink.is_none());
}

#[test]
fn test_invalid_filter_rejected_before_install() {
    let config = LoggingConfig::default().with_filter("core_codec=loud");
    assert!(matches!(init_logging(config), Err(Error::Config(_))));
}

// Only one global subscriber can exist per process, so installation and the
// second-init failure are checked in the same test.
#[test]
fn test_global_subscriber_forwards_to_sink() {
    let mut sink = MockSink::new();
    sink.expect_min_level().return_const(LogLevel::Info);
    sink.expect_log()
        .withf(|entry| {
            entry.target == "core_codec::adapter"
                && entry.message == "state change"
                && entry.fields.get("to").map(String::as_str) == Some("Running")
        })
        .times(1)
        .returning(|_| Ok(()));

    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_filter("core_codec=info")
        .with_test_writer(true)
        .with_logger_sink(Arc::new(sink));
    init_logging(config).unwrap();

    tracing::debug!(target: "core_codec::adapter", "filtered out");
    tracing::info!(target: "core_codec::adapter", to = "Running", "state change");

    let again = init_logging(LoggingConfig::default());
    assert!(matches!(again, Err(Error::Config(_))));
}
