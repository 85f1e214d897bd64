//! Loading pump options from files and environment overrides

use busroute::config::{
    AdditionalMemberHandling, ConfigLoader, ConfigurationError, ServiceBusMessagePumpOptions,
};
use busroute::CorrelationFormat;
use std::io::Write;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn write_config(extension: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{extension}"))
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_yaml_configuration() {
    let file = write_config(
        "yaml",
        r#"
job_id: billing-pump
max_messages_per_batch: 50
prefetch_count: 100
routing:
  auto_complete: false
  correlation: Hierarchical
  deserialization:
    additional_members: Ignore
circuit_breaker:
  message_recovery_period: 45000
  message_interval_during_recovery: 2500
session:
  max_concurrent_sessions: 4
  max_concurrent_calls_per_session: 2
  session_idle_timeout: 60000
"#,
    );

    let options = assert_ok!(ConfigLoader::new()
        .with_file(file.path())
        .with_env_prefix("BUSROUTE_YAML_TEST")
        .load());

    assert_eq!(options.job_id, "billing-pump");
    assert_eq!(options.max_messages_per_batch, 50);
    assert_eq!(options.prefetch_count, 100);
    assert!(!options.routing.auto_complete);
    assert_eq!(options.routing.correlation, CorrelationFormat::Hierarchical);
    assert_eq!(
        options.routing.deserialization.additional_members,
        AdditionalMemberHandling::Ignore
    );
    assert_eq!(options.circuit_breaker.message_recovery_period, Duration::from_secs(45));
    assert_eq!(
        options.circuit_breaker.message_interval_during_recovery,
        Duration::from_millis(2500)
    );
    assert_eq!(options.session.max_concurrent_sessions, 4);
    assert_eq!(options.session.session_idle_timeout, Some(Duration::from_secs(60)));
}

#[test]
fn test_load_json_configuration_keeps_defaults_for_missing_sections() {
    let file = write_config("json", r#"{ "job_id": "orders-pump", "max_messages_per_batch": 20 }"#);

    let options = assert_ok!(ConfigLoader::new()
        .with_file(file.path())
        .with_env_prefix("BUSROUTE_JSON_TEST")
        .load());

    let defaults = ServiceBusMessagePumpOptions::default();
    assert_eq!(options.job_id, "orders-pump");
    assert_eq!(options.max_messages_per_batch, 20);
    assert_eq!(options.circuit_breaker, defaults.circuit_breaker);
    assert_eq!(options.session, defaults.session);
    assert!(options.routing.auto_complete);
}

#[test]
fn test_invalid_recovery_period_is_rejected() {
    let file = write_config(
        "toml",
        r#"
job_id = "orders-pump"

[circuit_breaker]
message_recovery_period = 0
"#,
    );

    let result = ConfigLoader::new()
        .with_file(file.path())
        .with_env_prefix("BUSROUTE_INVALID_TEST")
        .load();

    let error = assert_err!(result);
    assert!(matches!(error, ConfigurationError::InvalidValue { .. }));
}
