// 通用类型定义
// 插件宿主与外部 API 层共享的值类型

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::CommonError;

/// 执行设备
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// 加速设备（GPU 等）
    Accelerated,
    /// 基线设备（CPU）
    #[default]
    Baseline,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerated => "accelerated",
            Self::Baseline => "baseline",
        }
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Accelerated)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accelerated" | "gpu" | "cuda" | "mps" => Ok(Self::Accelerated),
            "baseline" | "cpu" => Ok(Self::Baseline),
            other => Err(CommonError::validation(format!("未知的执行设备: {}", other))),
        }
    }
}

/// 错误分类
/// 封闭集合，执行结果与生命周期原因都只使用这些类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 依赖包或模型文件缺失
    DependencyMissing,
    /// 加速设备缺失或损坏
    DeviceUnavailable,
    /// 插件模块无法加载
    ImportFailure,
    /// 构造或初始化校验失败
    InitializationFailure,
    /// 对未就绪插件发起执行
    PluginUnavailable,
    /// 操作执行期间出错
    RuntimeFault,
}

impl ErrorKind {
    /// 错误代码
    pub fn code(&self) -> &'static str {
        match self {
            Self::DependencyMissing => "DEPENDENCY_MISSING",
            Self::DeviceUnavailable => "DEVICE_UNAVAILABLE",
            Self::ImportFailure => "IMPORT_FAILURE",
            Self::InitializationFailure => "INITIALIZATION_FAILURE",
            Self::PluginUnavailable => "PLUGIN_UNAVAILABLE",
            Self::RuntimeFault => "RUNTIME_FAULT",
        }
    }

    /// 是否属于环境问题（需要修改环境而不是重试）
    pub fn is_environmental(&self) -> bool {
        matches!(self, Self::DependencyMissing | Self::DeviceUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DependencyMissing => "DependencyMissing",
            Self::DeviceUnavailable => "DeviceUnavailable",
            Self::ImportFailure => "ImportFailure",
            Self::InitializationFailure => "InitializationFailure",
            Self::PluginUnavailable => "PluginUnavailable",
            Self::RuntimeFault => "RuntimeFault",
        };
        f.write_str(name)
    }
}
