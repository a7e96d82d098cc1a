use std::{env, fs};

use gatehouse_server::config::DatabaseBackend;
use gatehouse_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("gatehouse.toml");

    let toml_content = r#"
webapp_origin = "https://app.example.com"

[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 1024

[logging]
level = "debug"

[database]
backend = "memory"

[redis]
enabled = false
pool_size = 4
min_idle = 1

[jwt]
secret = "file-secret"

[flags]
environment_key = "env-key"
timeout_ms = 250

[workers.max_in_flight]
"gateway-cdc" = 20
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.server.body_limit_bytes, 1024);
    assert_eq!(cfg.database.backend, DatabaseBackend::Memory);
    assert_eq!(cfg.redis.pool_size, 4);
    assert_eq!(cfg.flags.timeout_ms, 250);
    assert_eq!(cfg.flags.cache_ttl_secs, 3600);
    assert_eq!(cfg.webapp_origin, "https://app.example.com");
    assert_eq!(cfg.workers.max_in_flight.get("gateway-cdc"), Some(&20));
    assert_eq!(cfg.cookies.tracking, "da2");

    // 2) Env override should win over file
    unsafe {
        env::set_var("GATEHOUSE__FLAGS__TIMEOUT_MS", "400");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.flags.timeout_ms, 400);
    unsafe {
        env::remove_var("GATEHOUSE__FLAGS__TIMEOUT_MS");
    }

    // 3) Invalid config (min_idle above pool size) should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[jwt]
secret = "file-secret"

[redis]
pool_size = 2
min_idle = 5
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("redis.min_idle must be <="));

    // 4) A missing token secret is rejected
    let no_secret = dir.path().join("no_secret.toml");
    fs::write(&no_secret, "[server]\nport = 9000\n").expect("write toml");
    let err = load_config(no_secret.to_str()).expect_err("expected validation error");
    assert!(err.contains("jwt.secret"));
}
