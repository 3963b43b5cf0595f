// 设备选择
// 请求加速设备但当前环境不可用时降级到基础设备

use std::sync::Arc;

use plugin_sandbox_common::Device;
use serde::{Deserialize, Serialize};

use crate::log_with_context;
use crate::logging::ExecutionContext;
use crate::plugins::dependency::EnvironmentProbe;

/// 设备选择结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceDecision {
    pub requested: Device,
    pub used: Device,
    pub fallback_occurred: bool,
}

impl DeviceDecision {
    /// 不需要降级的选择
    pub fn direct(device: Device) -> Self {
        Self {
            requested: device,
            used: device,
            fallback_occurred: false,
        }
    }
}

/// 设备解析器
#[derive(Clone)]
pub struct DeviceResolver {
    probe: Arc<dyn EnvironmentProbe>,
}

impl DeviceResolver {
    pub fn new(probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self { probe }
    }

    /// 为一次执行选择设备
    pub fn resolve(&self, requested: Device, context: &ExecutionContext) -> DeviceDecision {
        Self::resolve_with(requested, self.probe.as_ref(), Some(context))
    }

    /// 选择设备，每次调用最多降级一次
    pub fn resolve_with(
        requested: Device,
        probe: &dyn EnvironmentProbe,
        context: Option<&ExecutionContext>,
    ) -> DeviceDecision {
        if !requested.is_accelerated() || probe.accelerator_available() {
            return DeviceDecision::direct(requested);
        }

        match context {
            Some(ctx) => {
                log_with_context!(
                    warn,
                    ctx,
                    requested = %requested,
                    used = %Device::Baseline,
                    "加速设备不可用，插件 {} 降级到 {} 设备执行",
                    ctx.plugin,
                    Device::Baseline
                );
            }
            None => {
                tracing::warn!("加速设备不可用，降级到 {} 设备执行", Device::Baseline);
            }
        }

        DeviceDecision {
            requested,
            used: Device::Baseline,
            fallback_occurred: true,
        }
    }
}
