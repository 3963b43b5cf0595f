// 插件测试工具
// 提供测试用插件和工厂

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use plugin_sandbox_common::{Device, ErrorKind};
use serde_json::{Value, json};

use crate::plugins::plugin_interface::{Plugin, PluginFault};

/// 文字识别测试插件，只支持 `extract`
pub struct OcrPlugin;

#[async_trait]
impl Plugin for OcrPlugin {
    fn operations(&self) -> &[&str] {
        &["extract"]
    }

    async fn call(&self, _operation: &str, input: Value, device: Device) -> Result<Value, PluginFault> {
        Ok(json!({
            "text": input.get("image").cloned().unwrap_or(Value::Null),
            "device": device.as_str(),
        }))
    }
}

/// 故障注入方式
#[derive(Debug, Clone)]
pub enum FaultMode {
    /// 返回运行期故障
    Runtime(String),
    /// 返回指定分类的故障
    Kind(ErrorKind, String),
    /// 直接 panic
    Panic(String),
    /// 以非字符串载荷 panic
    OpaquePanic,
    /// 返回没有描述的故障
    Empty,
    /// 只在加速设备上失败
    AcceleratedOnly,
}

/// 按指定方式失败的测试插件
pub struct FaultyPlugin {
    mode: FaultMode,
}

impl FaultyPlugin {
    pub fn new(mode: FaultMode) -> Self {
        Self { mode }
    }

    pub fn runtime(message: &str) -> Self {
        Self::new(FaultMode::Runtime(message.to_string()))
    }

    pub fn panicking(message: &str) -> Self {
        Self::new(FaultMode::Panic(message.to_string()))
    }
}

#[async_trait]
impl Plugin for FaultyPlugin {
    async fn call(&self, _operation: &str, _input: Value, device: Device) -> Result<Value, PluginFault> {
        match &self.mode {
            FaultMode::Runtime(message) => Err(PluginFault::runtime(message.clone())),
            FaultMode::Kind(kind, message) => Err(PluginFault::new(*kind, "InjectedFault", message.clone())),
            FaultMode::Panic(message) => panic!("{}", message),
            FaultMode::OpaquePanic => std::panic::panic_any(42u32),
            FaultMode::Empty => Err(PluginFault::runtime("")),
            FaultMode::AcceleratedOnly if device.is_accelerated() => {
                Err(PluginFault::device("加速设备内存不足"))
            }
            FaultMode::AcceleratedOnly => Ok(json!({"device": device.as_str()})),
        }
    }
}

/// 统计调用次数的测试插件
#[derive(Clone, Default)]
pub struct CountingPlugin {
    calls: Arc<AtomicUsize>,
}

impl CountingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for CountingPlugin {
    async fn call(&self, _operation: &str, input: Value, _device: Device) -> Result<Value, PluginFault> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({"call": count, "input": input}))
    }
}

/// 带验证钩子的测试插件
pub struct ValidatingPlugin {
    pub passes: bool,
}

#[async_trait]
impl Plugin for ValidatingPlugin {
    fn has_validation_hook(&self) -> bool {
        true
    }

    async fn validate(&self) -> Result<(), PluginFault> {
        if self.passes {
            Ok(())
        } else {
            Err(PluginFault::new(
                ErrorKind::InitializationFailure,
                "ValueError",
                "模型权重校验失败",
            ))
        }
    }

    async fn call(&self, _operation: &str, input: Value, _device: Device) -> Result<Value, PluginFault> {
        Ok(input)
    }
}

/// 在调用之外的方法中 panic 的测试插件
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Misbehavior {
    /// 查询支持的操作时 panic
    Operations,
    /// 查询是否有验证钩子时 panic
    ValidationHook,
}

pub struct MisbehavingPlugin {
    pub misbehavior: Misbehavior,
}

impl MisbehavingPlugin {
    pub fn new(misbehavior: Misbehavior) -> Self {
        Self { misbehavior }
    }
}

#[async_trait]
impl Plugin for MisbehavingPlugin {
    fn operations(&self) -> &[&str] {
        if self.misbehavior == Misbehavior::Operations {
            panic!("操作表未初始化");
        }
        &[]
    }

    fn has_validation_hook(&self) -> bool {
        if self.misbehavior == Misbehavior::ValidationHook {
            panic!("验证钩子配置损坏");
        }
        false
    }

    async fn call(&self, _operation: &str, input: Value, _device: Device) -> Result<Value, PluginFault> {
        Ok(input)
    }
}
