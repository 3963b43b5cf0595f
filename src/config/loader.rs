// 配置加载器
// 处理 .env 文件、配置文件加载和校验

use crate::config::{DEFAULT_CONFIG_FILE, HostConfig};
use config::ConfigError;
use plugin_sandbox_common::CommonError;
use tracing::{debug, info};

/// 配置加载器
///
/// 加载结果直接返回给调用方，由调用方持有并向下传递，不存放在全局变量中。
pub struct ConfigLoader;

impl ConfigLoader {
    /// 加载并验证默认位置的配置
    pub fn load() -> Result<HostConfig, CommonError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// 加载并验证指定配置文件
    pub fn load_from(file_stem: &str) -> Result<HostConfig, CommonError> {
        // 加载 .env 文件
        if let Err(e) = dotenvy::dotenv() {
            debug!("未加载 .env 文件: {}", e);
        }

        let config = HostConfig::load_from(file_stem).map_err(convert_config_error)?;

        config.validate()?;

        info!("配置加载成功");
        info!("环境: {}", config.environment.name);
        info!("版本: {}", config.environment.version);

        Ok(config)
    }

    /// 以日志形式输出配置摘要
    pub fn log_summary(config: &HostConfig) {
        info!(
            environment = %config.environment.name,
            version = %config.environment.version,
            log_level = %config.logging.level,
            log_format = %config.logging.format,
            execution_history_size = config.registry.execution_history_size,
            runtime_fault_policy = ?config.registry.runtime_fault_policy,
            accelerator_override = ?config.probe.accelerator_override,
            package_search_paths = config.probe.package_search_paths.len(),
            "插件宿主配置摘要"
        );
    }
}

/// 配置错误转换辅助函数
pub fn convert_config_error(err: ConfigError) -> CommonError {
    CommonError::configuration(format!("配置错误: {}", err))
}
