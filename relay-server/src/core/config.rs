use std::path::PathBuf;

/// 服务器配置 - 所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/relay/server | 工作目录 |
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | HEARTBEAT_TIMEOUT_MS | 10000 | 心跳超时（毫秒），超过判离线 |
/// | RESTART_STALE_WINDOW_MS | 600000 | 重连恢复窗口（毫秒） |
/// | WEBHOOK_SECRET | (空) | 支付 webhook 签名密钥 |
/// | ENVIRONMENT | development | 运行环境 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/relay HTTP_PORT=8080 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储数据库、日志等文件
    pub work_dir: String,
    /// HTTP API 服务端口
    pub http_port: u16,
    /// 心跳超时（毫秒）— 在线/离线判定的唯一依据
    pub heartbeat_timeout_ms: i64,
    /// 重连恢复窗口（毫秒）— 中断的序列超过此时长不再重启
    pub restart_stale_window_ms: i64,
    /// 支付 webhook HMAC-SHA256 密钥；为空则拒绝所有 webhook
    pub webhook_secret: String,
    /// 运行环境: development | staging | production
    pub environment: String,
    /// 事件日志通道容量
    pub event_buffer_size: usize,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/relay/server".into()),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            heartbeat_timeout_ms: std::env::var("HEARTBEAT_TIMEOUT_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10_000),
            restart_stale_window_ms: std::env::var("RESTART_STALE_WINDOW_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(10 * 60 * 1000),
            webhook_secret: std::env::var("WEBHOOK_SECRET").unwrap_or_default(),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            event_buffer_size: std::env::var("EVENT_BUFFER_SIZE")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(256),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, http_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config
    }

    /// 引擎时间参数
    pub fn engine_config(&self) -> crate::engine::EngineConfig {
        crate::engine::EngineConfig {
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            restart_stale_window_ms: self.restart_stale_window_ms,
        }
    }

    /// 数据库目录 (work_dir/database)
    pub fn database_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("database")
    }

    /// 日志目录 (work_dir/logs)
    pub fn logs_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    /// 确保工作目录结构存在
    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.database_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否开发环境
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
