use std::io::Write;

use tempfile::{tempdir, NamedTempFile};
use tunnelscope::config::CONFIG_ENV_VAR;
use tunnelscope::{ConfigError, ExtractorConfig, FeatureExtractor};

#[test]
fn loads_partial_file_over_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "flow_timeout_secs": 120,
            "shard_count": 4,
            "capture": {{ "interface": "eth0", "bpf_filter": "udp port 53" }},
            "classifier": {{ "binary_model": "models/l1.onnx", "class_map": "models/class_map.json" }}
        }}"#
    )
    .unwrap();

    let cfg = ExtractorConfig::from_json_file(file.path()).unwrap();
    assert_eq!(cfg.flow_timeout_secs, 120);
    assert_eq!(cfg.flow_timeout_us(), 120_000_000);
    assert_eq!(cfg.shard_count, 4);
    assert_eq!(cfg.dns_window_secs, 60);
    assert_eq!(cfg.capture.interface.as_deref(), Some("eth0"));
    assert_eq!(cfg.capture.bpf_filter, "udp port 53");
    assert!(cfg.capture.promiscuous);

    let classifier = cfg.classifier.as_ref().unwrap();
    assert_eq!(classifier.attack_threshold, 0.85);
    assert!(classifier.multiclass_model.is_none());

    let ex = FeatureExtractor::new(cfg);
    assert_eq!(ex.config().shard_count, 4);
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.json");
    match ExtractorConfig::from_json_file(&path) {
        Err(ConfigError::Io { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected io error, got {other:?}"),
    }
}

#[test]
fn invalid_values_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"{ "shard_count": 0 }"#).unwrap();
    assert!(matches!(ExtractorConfig::from_json_file(&path), Err(ConfigError::Invalid(_))));

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(ExtractorConfig::from_json_file(&path), Err(ConfigError::Parse(_))));
}

#[test]
fn roundtrips_through_serialization() {
    let cfg = ExtractorConfig { domain_idle_timeout_secs: 900, ..Default::default() };
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.json");
    std::fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();
    assert_eq!(ExtractorConfig::from_json_file(&path).unwrap(), cfg);
}

#[test]
fn env_var_names_the_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("env.json");
    std::fs::write(&path, r#"{ "dns_window_secs": 30 }"#).unwrap();

    std::env::set_var(CONFIG_ENV_VAR, &path);
    let cfg = ExtractorConfig::from_env();
    std::env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(cfg.unwrap().dns_window_us(), 30_000_000);
}
