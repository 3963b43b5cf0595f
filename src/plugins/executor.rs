// 沙箱执行器
// 在隔离边界内调用插件，插件的任何故障都转换为结构化结果

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use plugin_sandbox_common::{Device, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Instrument, debug};

use crate::errors::SandboxError;
use crate::logging::ExecutionContext;
use crate::plugins::device::{DeviceDecision, DeviceResolver};
use crate::plugins::plugin_interface::PluginFault;
use crate::plugins::plugin_registry::{PluginRegistry, RuntimeFaultPolicy};
use crate::{log_with_context, span_with_context};

/// 执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOutcome {
    pub request_id: String,
    pub plugin: String,
    pub operation: String,
    pub ok: bool,
    pub value: Option<Value>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// 执行耗时（毫秒）
    pub duration_ms: f64,
    /// 插件被调用时的设备选择，未调用插件时为空
    pub device: Option<DeviceDecision>,
}

impl ExecutionOutcome {
    fn success(context: &ExecutionContext, value: Value, duration_ms: f64, device: DeviceDecision) -> Self {
        Self {
            request_id: context.request_id.clone(),
            plugin: context.plugin.clone(),
            operation: context.operation.clone(),
            ok: true,
            value: Some(value),
            error_kind: None,
            error_message: None,
            duration_ms,
            device: Some(device),
        }
    }

    fn failure(
        context: &ExecutionContext,
        kind: ErrorKind,
        message: impl Into<String>,
        duration_ms: f64,
        device: Option<DeviceDecision>,
    ) -> Self {
        Self {
            request_id: context.request_id.clone(),
            plugin: context.plugin.clone(),
            operation: context.operation.clone(),
            ok: false,
            value: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            duration_ms,
            device,
        }
    }

    /// 实际使用的设备
    pub fn device_used(&self) -> Option<Device> {
        self.device.map(|d| d.used)
    }

    /// 转换为 Result
    pub fn into_result(self) -> Result<Value, SandboxError> {
        if self.ok {
            return Ok(self.value.unwrap_or(Value::Null));
        }

        let message = self.error_message.unwrap_or_default();
        let plugin = self.plugin;
        Err(match self.error_kind {
            Some(ErrorKind::PluginUnavailable) => SandboxError::plugin_unavailable(plugin, message),
            Some(ErrorKind::DependencyMissing) => SandboxError::dependency_missing(message),
            Some(ErrorKind::DeviceUnavailable) => SandboxError::device_unavailable(message),
            Some(ErrorKind::ImportFailure) => SandboxError::import_failure(plugin, message),
            Some(ErrorKind::InitializationFailure) => {
                SandboxError::initialization_failure(plugin, message)
            }
            Some(ErrorKind::RuntimeFault) | None => SandboxError::runtime_fault(plugin, message),
        })
    }
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// 沙箱执行器
#[derive(Clone)]
pub struct SandboxedExecutor {
    registry: PluginRegistry,
    devices: DeviceResolver,
    policy: RuntimeFaultPolicy,
}

impl SandboxedExecutor {
    pub fn new(registry: PluginRegistry, devices: DeviceResolver) -> Self {
        let policy = registry.config().runtime_fault_policy;
        Self {
            registry,
            devices,
            policy,
        }
    }

    pub fn policy(&self) -> RuntimeFaultPolicy {
        self.policy
    }

    /// 执行插件操作
    pub async fn execute(
        &self,
        name: &str,
        operation: &str,
        input: Value,
        requested: Device,
    ) -> ExecutionOutcome {
        let context = ExecutionContext::new(name, operation);
        self.execute_with_context(context, input, requested).await
    }

    /// 使用调用方提供的上下文执行插件操作
    pub async fn execute_with_context(
        &self,
        context: ExecutionContext,
        input: Value,
        requested: Device,
    ) -> ExecutionOutcome {
        let span = span_with_context!(INFO, "plugin_execute", context);
        self.run(&context, input, requested).instrument(span).await
    }

    async fn run(&self, context: &ExecutionContext, input: Value, requested: Device) -> ExecutionOutcome {
        let started = Instant::now();
        let name = context.plugin.as_str();
        let operation = context.operation.as_str();

        let plugin = match self.registry.execution_target(name).await {
            Ok(plugin) => plugin,
            Err(reason) => {
                debug!("拒绝执行不可用插件: {} - {}", name, reason);
                return ExecutionOutcome::failure(
                    context,
                    ErrorKind::PluginUnavailable,
                    format!("插件不可用: {}: {}", name, reason),
                    millis(started.elapsed()),
                    None,
                );
            }
        };

        let declared = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let declared = plugin.operations();
            declared.is_empty() || declared.iter().any(|op| *op == operation)
        }));
        match declared {
            Ok(true) => {}
            Ok(false) => {
                let message = format!("插件 {} 不支持操作: {}", name, operation);
                self.registry
                    .record_error_with_message(name, None, &message)
                    .await;
                return ExecutionOutcome::failure(
                    context,
                    ErrorKind::RuntimeFault,
                    message,
                    millis(started.elapsed()),
                    None,
                );
            }
            Err(payload) => {
                let fault = PluginFault::from_panic(payload);
                return self
                    .fail(context, fault, millis(started.elapsed()), None)
                    .await;
            }
        }

        let decision = self.devices.resolve(requested, context);
        if !self.registry.begin_execution(name, &decision).await {
            let reason = self
                .registry
                .unavailable_reason(name)
                .await
                .unwrap_or_else(|| "插件已被移除".to_string());
            return ExecutionOutcome::failure(
                context,
                ErrorKind::PluginUnavailable,
                format!("插件不可用: {}: {}", name, reason),
                millis(started.elapsed()),
                None,
            );
        }

        let call_started = Instant::now();
        let result = AssertUnwindSafe(async { plugin.call(operation, input, decision.used).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(PluginFault::from_panic(payload)));
        let duration_ms = millis(call_started.elapsed());

        match result {
            Ok(value) => {
                self.registry.record_success(name, Some(duration_ms)).await;
                debug!("插件执行成功: {} ({:.2}ms, {})", name, duration_ms, decision.used);
                ExecutionOutcome::success(context, value, duration_ms, decision)
            }
            Err(fault) => self.fail(context, fault, duration_ms, Some(decision)).await,
        }
    }

    /// 记录插件故障并按策略处理
    async fn fail(
        &self,
        context: &ExecutionContext,
        fault: PluginFault,
        duration_ms: f64,
        decision: Option<DeviceDecision>,
    ) -> ExecutionOutcome {
        let name = context.plugin.as_str();
        let message = fault.to_string();
        self.registry
            .record_error_with_message(name, Some(duration_ms), &message)
            .await;

        let device = decision.map(|d| d.used.to_string()).unwrap_or_default();
        log_with_context!(
            warn,
            context,
            error_kind = %fault.kind,
            device = %device,
            "插件执行失败: {} - {}",
            name,
            message
        );

        if self.policy == RuntimeFaultPolicy::MarkFailed {
            let reason = format!("{}: {}", fault.kind, message);
            self.registry.mark_failed(name, &reason).await;
        }

        ExecutionOutcome::failure(context, fault.kind, message, duration_ms, decision)
    }
}
