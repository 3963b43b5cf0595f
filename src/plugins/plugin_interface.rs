// 插件接口规范
// 定义插件、插件工厂、清单和故障类型

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use plugin_sandbox_common::{Device, ErrorKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SandboxError;
use crate::plugins::dependency::CapabilityRequirements;

/// 插件名称格式
static PLUGIN_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").expect("插件名称正则表达式无效")
});

/// 插件接口
/// 所有插件必须实现此接口
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 插件支持的操作，返回空列表表示不限制
    fn operations(&self) -> &[&str] {
        &[]
    }

    /// 是否声明了构造后的校验钩子
    fn has_validation_hook(&self) -> bool {
        false
    }

    /// 构造后的校验钩子
    async fn validate(&self) -> Result<(), PluginFault> {
        Ok(())
    }

    /// 在指定设备上执行操作
    async fn call(
        &self,
        operation: &str,
        input: Value,
        device: Device,
    ) -> Result<Value, PluginFault>;
}

/// 插件工厂接口
/// 根据清单构造插件实例
pub trait PluginFactory: Send + Sync {
    /// 创建插件实例
    fn create(&self, manifest: &PluginManifest) -> Result<Arc<dyn Plugin>, PluginFault>;
}

impl<F> PluginFactory for F
where
    F: Fn(&PluginManifest) -> Result<Arc<dyn Plugin>, PluginFault> + Send + Sync,
{
    fn create(&self, manifest: &PluginManifest) -> Result<Arc<dyn Plugin>, PluginFault> {
        self(manifest)
    }
}

/// 插件工厂目录
/// 由宿主提供的 “名称 -> 工厂” 映射，替代按名称动态导入
#[derive(Default, Clone)]
pub struct FactoryCatalog {
    factories: HashMap<String, Arc<dyn PluginFactory>>,
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工厂，同名工厂会被替换
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn PluginFactory>) -> bool {
        self.factories.insert(name.into(), factory).is_some()
    }

    /// 使用闭包注册工厂
    pub fn register_fn<F>(&mut self, name: impl Into<String>, factory: F) -> bool
    where
        F: Fn(&PluginManifest) -> Result<Arc<dyn Plugin>, PluginFault> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(factory))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 已注册的工厂名称（排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for FactoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryCatalog")
            .field("factories", &self.names())
            .finish()
    }
}

/// 插件清单
/// 在构造插件之前读取的声明式描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginManifest {
    /// 插件名称（唯一）
    pub name: String,
    /// 插件描述
    #[serde(default)]
    pub description: String,
    /// 插件版本
    pub version: String,
    /// 工厂名称，未指定时使用插件名称
    #[serde(default)]
    pub factory: Option<String>,
    /// 依赖包
    #[serde(default)]
    pub required_packages: Vec<String>,
    /// 是否需要加速设备
    #[serde(default)]
    pub requires_accelerated_device: bool,
    /// 模型文件 {标签: 路径}
    #[serde(default)]
    pub required_model_paths: BTreeMap<String, PathBuf>,
}

impl PluginManifest {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
            factory: None,
            required_packages: Vec::new(),
            requires_accelerated_device: false,
            required_model_paths: BTreeMap::new(),
        }
    }

    pub fn with_factory(mut self, factory: impl Into<String>) -> Self {
        self.factory = Some(factory.into());
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.required_packages.push(package.into());
        self
    }

    pub fn requiring_accelerator(mut self) -> Self {
        self.requires_accelerated_device = true;
        self
    }

    pub fn with_model(mut self, label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.required_model_paths.insert(label.into(), path.into());
        self
    }

    /// 工厂名称
    pub fn factory_name(&self) -> &str {
        self.factory.as_deref().unwrap_or(&self.name)
    }

    /// 环境能力要求
    pub fn requirements(&self) -> CapabilityRequirements {
        CapabilityRequirements {
            required_packages: self.required_packages.clone(),
            requires_accelerated_device: self.requires_accelerated_device,
            required_model_paths: self.required_model_paths.clone(),
        }
    }

    /// 验证清单
    pub fn validate(&self) -> Result<(), SandboxError> {
        if !PLUGIN_NAME_PATTERN.is_match(&self.name) {
            return Err(SandboxError::validation(
                "name",
                format!(
                    "插件名称无效: '{}'（只允许字母、数字、'_'、'-'、'.'，最长 64 个字符）",
                    self.name
                ),
            ));
        }

        if self.version.trim().is_empty() {
            return Err(SandboxError::validation(
                "version",
                format!("插件 {} 缺少版本号", self.name),
            ));
        }

        if let Some(package) = self.required_packages.iter().find(|p| p.trim().is_empty()) {
            return Err(SandboxError::validation(
                "required_packages",
                format!("插件 {} 声明了空的依赖包名称: '{}'", self.name, package),
            ));
        }

        Ok(())
    }
}

/// 插件故障
/// 插件返回的结构化错误，执行器和加载器将其转换为结果或状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginFault {
    /// 故障分类
    pub kind: ErrorKind,
    /// 故障类型名称
    pub fault_type: String,
    /// 故障描述
    pub message: String,
}

impl PluginFault {
    pub fn new(kind: ErrorKind, fault_type: impl Into<String>, message: impl Into<String>) -> Self {
        let fault_type = fault_type.into();
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("{} (无详细信息)", fault_type)
        } else {
            message
        };

        Self {
            kind,
            fault_type,
            message,
        }
    }

    /// 运行期故障
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeFault, "RuntimeError", message)
    }

    /// 设备故障
    pub fn device(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeviceUnavailable, "DeviceError", message)
    }

    /// 依赖缺失
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyMissing, "DependencyError", message)
    }

    /// 初始化故障
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InitializationFailure, "InitializationError", message)
    }

    /// 从任意错误转换，类型名称取错误类型的短名称
    pub fn from_error<E>(kind: ErrorKind, err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        Self::new(kind, short_type_name(std::any::type_name::<E>()), err.to_string())
    }

    /// 从 panic 载荷转换
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(ErrorKind::RuntimeFault, "Panic", panic_message(payload))
    }

    /// 修改故障分类
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for PluginFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.fault_type, self.message)
    }
}

impl std::error::Error for PluginFault {}

/// 提取 panic 载荷中的可读信息
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}
