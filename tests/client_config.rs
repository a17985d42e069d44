use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use leafscan::{ClientConfig, Facing};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LEAFSCAN_CONFIG",
        "LEAFSCAN_API_BASE_URL",
        "LEAFSCAN_COOKIE_PATH",
        "LEAFSCAN_CAMERA_BACK",
        "LEAFSCAN_CAMERA_FRONT",
        "LEAFSCAN_MAX_CROP_COUNT",
        "LEAFSCAN_PREDICT_TIMEOUT_SECS",
        "LEAFSCAN_REQUEST_TIMEOUT_SECS",
        "LEAFSCAN_MAX_UPLOAD_BYTES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ClientConfig::load().expect("load defaults");
    assert_eq!(cfg.api.base_url, "http://localhost:5000");
    assert_eq!(cfg.api.predict_timeout, Duration::from_secs(120));
    assert_eq!(cfg.api.request_timeout, Duration::from_secs(10));
    assert_eq!(cfg.capture.max_crop_count, 3);
    assert_eq!(cfg.capture.max_upload_bytes, 10 * 1024 * 1024);
    assert_eq!(cfg.camera.facing, Facing::Back);
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let cookie_path = file.path().with_extension("cookies");
    let json = format!(
        r#"{{
            "api": {{
                "base_url": "https://leaf.example.org/",
                "cookie_path": "{}",
                "predict_timeout_secs": 60
            }},
            "camera": {{
                "back": "stub://greenhouse",
                "facing": "front",
                "display_width": 480,
                "display_height": 640
            }},
            "capture": {{
                "max_crop_count": 5,
                "crop_output_edge": 0
            }}
        }}"#,
        cookie_path.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("LEAFSCAN_CONFIG", file.path());
    std::env::set_var("LEAFSCAN_MAX_CROP_COUNT", "2");
    std::env::set_var("LEAFSCAN_CAMERA_FRONT", "http://10.0.0.7/capture.jpg");

    let cfg = ClientConfig::load().expect("load config");

    assert_eq!(cfg.api.base_url, "https://leaf.example.org");
    assert_eq!(cfg.api.cookie_path.as_deref(), Some(cookie_path.as_path()));
    assert_eq!(cfg.api.predict_timeout, Duration::from_secs(60));
    assert_eq!(cfg.api.request_timeout, Duration::from_secs(10));
    assert_eq!(cfg.camera.back_device, "stub://greenhouse");
    assert_eq!(cfg.camera.front_device, "http://10.0.0.7/capture.jpg");
    assert_eq!(cfg.camera.facing, Facing::Front);
    assert_eq!(cfg.camera.display_width, 480);
    assert_eq!(cfg.capture.max_crop_count, 2);
    assert_eq!(cfg.capture.crop_output_edge, 0);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[api]
base_url = "http://192.168.1.20:5000"
request_timeout_secs = 3

[capture]
max_upload_bytes = 2097152
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("LEAFSCAN_CONFIG", file.path());

    let cfg = ClientConfig::load().expect("load config");
    assert_eq!(cfg.api.base_url, "http://192.168.1.20:5000");
    assert_eq!(cfg.api.request_timeout, Duration::from_secs(3));
    assert_eq!(cfg.file_config().max_bytes, 2 * 1024 * 1024);

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LEAFSCAN_API_BASE_URL", "ftp://leaf.example.org");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("LEAFSCAN_MAX_CROP_COUNT", "0");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("LEAFSCAN_REQUEST_TIMEOUT_SECS", "soon");
    assert!(ClientConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("LEAFSCAN_CONFIG", file.path());
    assert!(ClientConfig::load().is_err());

    clear_env();
}
