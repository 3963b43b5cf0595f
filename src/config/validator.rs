// 配置验证器
// 提供详细的配置验证逻辑

use crate::config::{EnvironmentConfig, HostConfig, LoggingConfig};
use crate::plugins::{ProbeConfig, RegistryConfig};
use plugin_sandbox_common::CommonError;

/// 执行时间样本数上限
const MAX_EXECUTION_HISTORY: usize = 1000;

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证完整配置，收集所有错误
    pub fn validate_all(config: &HostConfig) -> Result<(), Vec<CommonError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_logging(&config.logging) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_registry(&config.registry) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_probe(&config.probe) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_environment(&config.environment) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// 验证日志配置
    pub fn validate_logging(config: &LoggingConfig) -> Result<(), CommonError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.level.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志级别: {}，有效值: {:?}",
                config.level, valid_levels
            )));
        }

        let valid_formats = ["json", "pretty", "compact", "full"];
        if !valid_formats.contains(&config.format.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的日志格式: {}，有效值: {:?}",
                config.format, valid_formats
            )));
        }

        if config.file_enabled && config.file_path.as_deref().is_none_or(|p| p.trim().is_empty()) {
            return Err(CommonError::validation("启用文件日志时必须指定日志目录"));
        }

        if config.max_files == Some(0) {
            return Err(CommonError::validation("日志文件保留数量不能为 0"));
        }

        Ok(())
    }

    /// 验证注册表配置
    pub fn validate_registry(config: &RegistryConfig) -> Result<(), CommonError> {
        if config.execution_history_size == 0 {
            return Err(CommonError::validation("执行时间样本数不能为 0"));
        }

        if config.execution_history_size > MAX_EXECUTION_HISTORY {
            return Err(CommonError::validation(format!(
                "执行时间样本数不建议超过 {}",
                MAX_EXECUTION_HISTORY
            )));
        }

        if config.transition_history_size == 0 {
            return Err(CommonError::validation("状态转换历史长度不能为 0"));
        }

        Ok(())
    }

    /// 验证环境探测配置
    pub fn validate_probe(config: &ProbeConfig) -> Result<(), CommonError> {
        if config
            .package_search_paths
            .iter()
            .any(|path| path.trim().is_empty())
        {
            return Err(CommonError::validation("依赖包搜索路径不能包含空路径"));
        }

        Ok(())
    }

    /// 验证环境配置
    pub fn validate_environment(config: &EnvironmentConfig) -> Result<(), CommonError> {
        let valid_environments = ["development", "staging", "production", "test"];
        if !valid_environments.contains(&config.name.as_str()) {
            return Err(CommonError::validation(format!(
                "无效的环境名称: {}，有效值: {:?}",
                config.name, valid_environments
            )));
        }

        if config.version.is_empty() {
            return Err(CommonError::validation("版本信息不能为空"));
        }

        Ok(())
    }
}
