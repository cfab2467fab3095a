use std::io::Write;
use std::time::Duration;

use pointy::EngineConfig;

#[test]
fn defaults_are_sensible() {
    let config = EngineConfig::default();
    assert_eq!(config.cpu_workers, 4);
    assert_eq!(config.io_inflight, 64);
    assert_eq!(config.backoff.base_ms, 0);
    assert_eq!(config.deadline_ms, None);
    config.validate().unwrap();
}

#[test]
fn empty_toml_yields_defaults() {
    let config = EngineConfig::from_toml_str("").unwrap();
    assert_eq!(config.cpu_workers, 4);
    assert!(config.deadline().is_none());
}

#[test]
fn full_toml_overrides_everything() {
    let config = EngineConfig::from_toml_str(
        r#"
        [engine]
        cpu_workers = 8
        io_inflight = 128
        deadline_ms = 60000

        [engine.backoff]
        base_ms = 200
        multiplier = 3.0
        max_ms = 5000
        "#,
    )
    .unwrap();

    assert_eq!(config.cpu_workers, 8);
    assert_eq!(config.io_inflight, 128);
    assert_eq!(config.deadline(), Some(Duration::from_secs(60)));
    assert_eq!(config.backoff.base_ms, 200);
    assert_eq!(config.backoff.multiplier, 3.0);
    assert_eq!(config.backoff.max_ms, 5000);
}

#[test]
fn invalid_values_are_rejected() {
    assert!(EngineConfig::from_toml_str("[engine]\ncpu_workers = 0\n").is_err());
    assert!(EngineConfig::from_toml_str("[engine]\nio_inflight = 0\n").is_err());
    assert!(
        EngineConfig::from_toml_str("[engine.backoff]\nmultiplier = 0.5\n").is_err()
    );
}

#[test]
fn loads_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[engine]\ncpu_workers = 2\n").unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.cpu_workers, 2);
}

#[test]
fn missing_file_reports_the_path() {
    let err = EngineConfig::load(std::path::Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(err.to_string().contains("not/here.toml"));
}

#[test]
fn retry_delay_grows_exponentially_and_caps() {
    let config = EngineConfig::from_toml_str(
        r#"
        [engine.backoff]
        base_ms = 100
        multiplier = 2.0
        max_ms = 350
        "#,
    )
    .unwrap();

    // Attempt 1 is the first try; no delay before it.
    assert_eq!(config.retry_delay(1), Duration::ZERO);
    assert_eq!(config.retry_delay(2), Duration::from_millis(100));
    assert_eq!(config.retry_delay(3), Duration::from_millis(200));
    // Capped by max_ms.
    assert_eq!(config.retry_delay(4), Duration::from_millis(350));
    assert_eq!(config.retry_delay(10), Duration::from_millis(350));
}

#[test]
fn zero_base_disables_backoff() {
    let config = EngineConfig::default();
    assert_eq!(config.retry_delay(5), Duration::ZERO);
}
