use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use evento::config::ProducerConfig;
use evento::detect::DetectorKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "EVENTO_CONFIG",
        "EVENTO_DB_PATH",
        "EVENTO_APP_CONFIG_DIR",
        "EVENTO_VIDEO_FEED",
        "EVENTO_THRESHOLD",
        "EVENTO_LOG_CAPACITY",
        "EVENTO_STREAM",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "evento_prod.db",
        "app_config_dir": "/etc/evento/roi",
        "video_feed": "rtsp://camera-1/stream",
        "local_debug": true,
        "detector": {
            "kind": "replay",
            "model_dir": "/var/lib/evento/replay.jsonl",
            "run_mode": "fp32",
            "use_gpu": true
        },
        "classify": {
            "threshold": 0.6,
            "alpha": 0.3,
            "vehicle_threshold": 8
        },
        "frame_log": {
            "stream": "camera:1",
            "capacity": 250
        },
        "poll": {
            "backoff_min_ms": 20,
            "backoff_max_ms": 400
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("EVENTO_CONFIG", file.path());
    std::env::set_var("EVENTO_STREAM", "camera:2");
    std::env::set_var("EVENTO_THRESHOLD", "0.75");

    let cfg = ProducerConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "evento_prod.db");
    assert_eq!(cfg.app_config_dir.to_str(), Some("/etc/evento/roi"));
    assert_eq!(cfg.video_feed, "rtsp://camera-1/stream");
    assert!(cfg.local_debug);
    assert_eq!(cfg.detector.kind, DetectorKind::Replay);
    assert_eq!(cfg.detector.run_mode, "fp32");
    assert!(cfg.detector.use_gpu);
    assert_eq!(cfg.classify.threshold, 0.75);
    assert_eq!(cfg.classify.alpha, 0.3);
    assert_eq!(cfg.classify.vehicle_threshold, 8);
    assert_eq!(cfg.stream, "camera:2");
    assert_eq!(cfg.log_capacity, 250);
    assert_eq!(cfg.poll_backoff_min, Duration::from_millis(20));
    assert_eq!(cfg.poll_backoff_max, Duration::from_millis(400));

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ProducerConfig::load().expect("load defaults");
    assert_eq!(cfg.db_path, "evento.db");
    assert_eq!(cfg.stream, "camera:0");
    assert_eq!(cfg.log_capacity, 1000);
    assert_eq!(cfg.classify.threshold, 0.5);
    assert_eq!(cfg.detector.kind, DetectorKind::Stub);
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("EVENTO_LOG_CAPACITY", "lots");
    assert!(ProducerConfig::load().is_err());
    clear_env();

    std::env::set_var("EVENTO_LOG_CAPACITY", "0");
    assert!(ProducerConfig::load().is_err());
    clear_env();

    std::env::set_var("EVENTO_THRESHOLD", "2.0");
    assert!(ProducerConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_malformed_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"detector": {"kind": "yolo"}}"#).expect("write");
    std::env::set_var("EVENTO_CONFIG", file.path());

    let err = ProducerConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
