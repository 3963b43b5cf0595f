// 宿主设置和配置
// 定义配置结构体和加载逻辑

use config::{Config, ConfigError, Environment, File};
use plugin_sandbox_common::CommonError;
use serde::{Deserialize, Serialize};

use crate::plugins::{ProbeConfig, RegistryConfig};

/// 默认配置文件名（不含扩展名）
pub const DEFAULT_CONFIG_FILE: &str = "sandbox";

/// 环境变量前缀
pub const ENV_PREFIX: &str = "SANDBOX";

/// 插件宿主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub logging: LoggingConfig,
    pub registry: RegistryConfig,
    pub probe: ProbeConfig,
    pub environment: EnvironmentConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_enabled: bool,
    /// 日志目录
    pub file_path: Option<String>,
    pub max_files: Option<usize>,
}

/// 环境配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub version: String,
}

impl HostConfig {
    /// 从默认配置文件和环境变量加载配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// 从指定配置文件加载配置，文件不存在时只使用默认值和环境变量
    pub fn load_from(file_stem: &str) -> Result<Self, ConfigError> {
        let mut config = Config::builder();

        // 1. 加载默认配置
        config = config.add_source(Config::try_from(&HostConfig::default())?);

        // 2. 尝试加载配置文件
        config = config.add_source(File::with_name(file_stem).required(false));

        // 3. 加载环境变量（优先级最高）
        config = config.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let config = config.build()?;
        let mut host_config: HostConfig = config.try_deserialize()?;

        host_config.environment.version = env!("CARGO_PKG_VERSION").to_string();

        Ok(host_config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), CommonError> {
        use crate::config::ConfigValidator;

        match ConfigValidator::validate_all(self) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                Err(CommonError::configuration(format!(
                    "配置验证失败: {}",
                    error_messages.join("; ")
                )))
            }
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.name == "production"
    }

    pub fn is_test(&self) -> bool {
        self.environment.name == "test"
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
                file_enabled: false,
                file_path: None,
                max_files: Some(10),
            },
            registry: RegistryConfig::default(),
            probe: ProbeConfig::default(),
            environment: EnvironmentConfig {
                name: "development".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}
