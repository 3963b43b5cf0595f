// 统一错误类型定义

use plugin_sandbox_common::{CommonError, ErrorKind};
use serde::{Deserialize, Serialize};

use thiserror::Error;

/// 插件沙箱统一错误类型
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "error_type", content = "details")]
pub enum SandboxError {
    /// 配置错误
    #[error("配置错误: {message}")]
    Configuration { message: String },

    /// 依赖缺失
    #[error("依赖缺失: {message}")]
    DependencyMissing { message: String },

    /// 加速设备不可用
    #[error("设备不可用: {message}")]
    DeviceUnavailable { message: String },

    /// 插件模块加载失败
    #[error("插件加载失败: {plugin} - {message}")]
    ImportFailure { plugin: String, message: String },

    /// 插件初始化失败
    #[error("插件初始化失败: {plugin} - {message}")]
    InitializationFailure { plugin: String, message: String },

    /// 插件不可用
    #[error("插件不可用: {plugin} - {reason}")]
    PluginUnavailable { plugin: String, reason: String },

    /// 运行期故障
    #[error("插件执行故障: {plugin} - {message}")]
    RuntimeFault { plugin: String, message: String },

    /// 非法状态转换
    #[error("非法状态转换: {plugin} {from} -> {to}")]
    InvalidTransition {
        plugin: String,
        from: String,
        to: String,
    },

    /// 缺少状态原因
    #[error("状态 {state} 必须提供原因: {plugin}")]
    MissingReason { plugin: String, state: String },

    /// 资源未找到
    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    /// 验证错误
    #[error("验证错误: {field} - {message}")]
    Validation { field: String, message: String },

    /// IO 错误
    #[error("IO 错误: {message}")]
    Io { message: String },

    /// 内部错误
    #[error("内部错误: {message}")]
    Internal { message: String },
}

impl SandboxError {
    /// 获取错误代码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::DependencyMissing { .. } => "DEPENDENCY_MISSING",
            Self::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE",
            Self::ImportFailure { .. } => "IMPORT_FAILURE",
            Self::InitializationFailure { .. } => "INITIALIZATION_FAILURE",
            Self::PluginUnavailable { .. } => "PLUGIN_UNAVAILABLE",
            Self::RuntimeFault { .. } => "RUNTIME_FAULT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::MissingReason { .. } => "MISSING_REASON",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// 映射到插件错误分类
    /// 只有属于插件故障分类的错误才有对应的 ErrorKind
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::DependencyMissing { .. } => Some(ErrorKind::DependencyMissing),
            Self::DeviceUnavailable { .. } => Some(ErrorKind::DeviceUnavailable),
            Self::ImportFailure { .. } => Some(ErrorKind::ImportFailure),
            Self::InitializationFailure { .. } => Some(ErrorKind::InitializationFailure),
            Self::PluginUnavailable { .. } => Some(ErrorKind::PluginUnavailable),
            Self::RuntimeFault { .. } => Some(ErrorKind::RuntimeFault),
            _ => None,
        }
    }

    /// 是否应该以 error 级别记录
    pub fn should_log(&self) -> bool {
        !matches!(
            self,
            Self::NotFound { .. } | Self::Validation { .. } | Self::PluginUnavailable { .. }
        )
    }

    /// 创建配置错误
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// 创建依赖缺失错误
    pub fn dependency_missing(message: impl Into<String>) -> Self {
        Self::DependencyMissing {
            message: message.into(),
        }
    }

    /// 创建设备不可用错误
    pub fn device_unavailable(message: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            message: message.into(),
        }
    }

    /// 创建插件加载失败错误
    pub fn import_failure(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ImportFailure {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// 创建插件初始化失败错误
    pub fn initialization_failure(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InitializationFailure {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// 创建插件不可用错误
    pub fn plugin_unavailable(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PluginUnavailable {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// 创建运行期故障
    pub fn runtime_fault(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuntimeFault {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// 创建非法状态转换错误
    pub fn invalid_transition(
        plugin: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            plugin: plugin.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// 创建缺少原因错误
    pub fn missing_reason(plugin: impl Into<String>, state: impl Into<String>) -> Self {
        Self::MissingReason {
            plugin: plugin.into(),
            state: state.into(),
        }
    }

    /// 创建资源未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// 创建验证错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建 IO 错误
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// 从 CommonError 转换
impl From<CommonError> for SandboxError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::Configuration { message } => Self::configuration(message),
            CommonError::Validation { message } => Self::validation("general", message),
            CommonError::Internal { message } => Self::internal(message),
        }
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for SandboxError {
    fn from(err: config::ConfigError) -> Self {
        Self::configuration(format!("配置加载错误: {}", err))
    }
}

/// 从 std::io::Error 转换
impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(format!("文件或目录: {}", err)),
            _ => Self::io(err.to_string()),
        }
    }
}

/// 从 serde_json::Error 转换
impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation("json", format!("JSON 解析错误: {}", err))
    }
}
