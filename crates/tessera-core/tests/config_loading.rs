//! 配置加载契约测试。
//!
//! - **Why**：部署方只维护一份 TOML，缺省字段必须回落到可运行的默认值，越界取值必须在启动前被拒绝。
//! - **How**：分别覆盖空文档、部分覆盖、未知字段、越界值与文件读取五条路径。

use std::time::Duration;

use tessera_core::config::TesseraConfig;
use tessera_core::telemetry::{TelemetryError, init_tracing};
use tessera_core::ConfigError;

#[test]
fn empty_document_yields_defaults() {
    let config = TesseraConfig::from_toml_str("").expect("空文档应使用默认值");
    assert_eq!(config, TesseraConfig::default());
    assert_eq!(config.router.poll_interval(), Duration::from_millis(100));
    assert_eq!(config.router.route_scheme, "inproc");
    assert_eq!(
        config.registry.refresh_interval(),
        Some(Duration::from_secs(5))
    );
}

#[test]
fn partial_override_keeps_other_defaults() {
    let config = TesseraConfig::from_toml_str(
        r#"
        [router]
        bind_address = "tcp://127.0.0.1:7400"
        stats_interval_ms = 0

        [registry]
        refresh_interval_ms = 0
        "#,
    )
    .expect("合法配置应解析成功");
    assert_eq!(config.router.bind_address, "tcp://127.0.0.1:7400");
    assert_eq!(config.router.stats_interval(), None);
    assert_eq!(config.router.poll_interval_ms, 100);
    assert_eq!(config.registry.refresh_interval(), None);
    assert_eq!(config.tcp.max_frame_len, 16 * 1024 * 1024);
}

#[test]
fn unknown_field_is_a_parse_error() {
    let err = TesseraConfig::from_toml_str("[router]\npoll_ms = 5\n").expect_err("未知字段必须报错");
    assert!(matches!(err, ConfigError::Parse(_)));
    assert_eq!(err.code(), "tessera.config.parse_failed");
}

#[test]
fn zero_poll_interval_is_rejected() {
    let err = TesseraConfig::from_toml_str("[router]\npoll_interval_ms = 0\n")
        .expect_err("0 毫秒轮询会导致忙等");
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "router.poll_interval_ms",
            ..
        }
    ));
}

#[test]
fn load_reads_file_and_reports_missing_path() {
    let dir = std::env::temp_dir().join(format!("tessera-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("创建临时目录");
    let path = dir.join("tessera.toml");
    std::fs::write(&path, "[tcp]\nio_threads = 4\n").expect("写入临时配置");

    let config = TesseraConfig::load(&path).expect("文件配置应加载成功");
    assert_eq!(config.tcp.io_threads, 4);

    let missing = TesseraConfig::load(dir.join("absent.toml")).expect_err("缺失文件必须报错");
    assert!(matches!(missing, ConfigError::Read { .. }));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn tracing_can_only_be_installed_once() {
    let first = init_tracing("info");
    assert!(matches!(first, Ok(()) | Err(TelemetryError::AlreadyInstalled)));
    assert!(matches!(
        init_tracing("info"),
        Err(TelemetryError::AlreadyInstalled)
    ));
}
