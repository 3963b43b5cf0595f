// 日志系统设置

use crate::config::LoggingConfig;
use anyhow::{Context, Result, anyhow};

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "plugin-sandbox";

/// 日志系统初始化器
pub struct LoggingSetup;

impl LoggingSetup {
    /// 初始化日志系统
    ///
    /// 启用文件日志时返回后台写线程的 guard，调用方需要持有它直到进程退出，
    /// 否则缓冲中的日志会丢失。
    pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
        // 创建环境过滤器
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let (writer, guard, ansi) = match Self::file_writer(config)? {
            Some((writer, guard)) => (BoxMakeWriter::new(writer), Some(guard), false),
            None => (BoxMakeWriter::new(std::io::stdout), None, true),
        };

        tracing_subscriber::registry()
            .with(Self::format_layer(&config.format, writer, ansi))
            .with(env_filter)
            .try_init()
            .context("日志系统已经初始化")?;

        tracing::info!("日志系统初始化完成");
        tracing::info!("日志级别: {}", config.level);
        tracing::info!("日志格式: {}", config.format);

        if config.file_enabled {
            tracing::info!("文件日志已启用: {:?}", config.file_path);
        }

        Ok(guard)
    }

    /// 根据配置格式创建输出层
    fn format_layer(
        format: &str,
        writer: BoxMakeWriter,
        ansi: bool,
    ) -> Box<dyn Layer<Registry> + Send + Sync> {
        let base = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true);

        match format {
            "json" => base
                .json()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "pretty" => base
                .pretty()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "compact" => base.compact().boxed(),
            _ => base
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        }
    }

    /// 创建按天滚动的非阻塞文件写入器
    pub(crate) fn file_writer(config: &LoggingConfig) -> Result<Option<(NonBlocking, WorkerGuard)>> {
        if !config.file_enabled {
            return Ok(None);
        }

        let directory = config
            .file_path
            .as_deref()
            .ok_or_else(|| anyhow!("启用文件日志时必须指定日志目录"))?;

        std::fs::create_dir_all(directory)
            .with_context(|| format!("无法创建日志目录: {}", directory))?;

        let mut builder = RollingBuilder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log");

        if let Some(max_files) = config.max_files {
            builder = builder.max_log_files(max_files);
        }

        let appender = builder
            .build(directory)
            .with_context(|| format!("无法创建日志文件: {}", directory))?;

        Ok(Some(tracing_appender::non_blocking(appender)))
    }

    /// 解析日志级别
    pub fn parse_level(level: &str) -> Level {
        match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// 创建开发环境日志配置
    pub fn development_config() -> LoggingConfig {
        LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
            file_enabled: false,
            file_path: None,
            max_files: None,
        }
    }

    /// 创建生产环境日志配置
    pub fn production_config() -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            format: "json".to_string(),
            file_enabled: true,
            file_path: Some("./logs".to_string()),
            max_files: Some(10),
        }
    }

    /// 创建测试环境日志配置
    pub fn test_config() -> LoggingConfig {
        LoggingConfig {
            level: "warn".to_string(),
            format: "compact".to_string(),
            file_enabled: false,
            file_path: None,
            max_files: None,
        }
    }
}
