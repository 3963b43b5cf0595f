// 插件管理器
// 组装注册表、加载器、执行器和健康服务，作为宿主的统一入口

use std::path::Path;
use std::sync::Arc;

use plugin_sandbox_common::Device;
use serde_json::Value;
use tracing::info;

use crate::config::HostConfig;
use crate::errors::SandboxError;
use crate::logging::ExecutionContext;
use crate::plugins::dependency::{DependencyResolver, EnvironmentProbe, SystemProbe};
use crate::plugins::device::DeviceResolver;
use crate::plugins::executor::{ExecutionOutcome, SandboxedExecutor};
use crate::plugins::health::{HealthService, HealthSummary, PluginHealthRecord};
use crate::plugins::plugin_interface::{Plugin, PluginFactory, PluginFault, PluginManifest};
use crate::plugins::plugin_loader::{LoadSummary, PluginLoader};
use crate::plugins::plugin_registry::{PluginRegistry, RegistryConfig};

/// 插件管理器
///
/// 所有组件共享同一个注册表句柄，克隆管理器不会复制插件状态。
#[derive(Clone)]
pub struct PluginManager {
    registry: PluginRegistry,
    loader: PluginLoader,
    executor: SandboxedExecutor,
    health: HealthService,
    probe: Arc<dyn EnvironmentProbe>,
}

impl PluginManager {
    /// 根据宿主配置创建管理器，使用系统环境探测
    pub fn new(config: &HostConfig) -> Self {
        let probe: Arc<dyn EnvironmentProbe> = Arc::new(SystemProbe::new(config.probe.clone()));
        Self::with_probe(config.registry.clone(), probe)
    }

    /// 使用指定的环境探测创建管理器
    pub fn with_probe(config: RegistryConfig, probe: Arc<dyn EnvironmentProbe>) -> Self {
        let registry = PluginRegistry::new(Some(config));
        let loader = PluginLoader::new(registry.clone(), DependencyResolver::new(probe.clone()));
        let executor = SandboxedExecutor::new(registry.clone(), DeviceResolver::new(probe.clone()));
        let health = HealthService::new(registry.clone());

        info!(
            "插件管理器已创建 (运行时故障策略: {:?}, 加速设备: {})",
            registry.config().runtime_fault_policy,
            probe.accelerator_available()
        );

        Self {
            registry,
            loader,
            executor,
            health,
            probe,
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn executor(&self) -> &SandboxedExecutor {
        &self.executor
    }

    pub fn health(&self) -> &HealthService {
        &self.health
    }

    pub fn probe(&self) -> Arc<dyn EnvironmentProbe> {
        self.probe.clone()
    }

    pub async fn register_factory(&self, name: &str, factory: Arc<dyn PluginFactory>) {
        self.loader.register_factory(name, factory).await;
    }

    pub async fn register_fn<F>(&self, name: &str, factory: F)
    where
        F: Fn(&PluginManifest) -> Result<Arc<dyn Plugin>, PluginFault> + Send + Sync + 'static,
    {
        self.loader.register_fn(name, factory).await;
    }

    pub async fn load(&self, manifest: &PluginManifest) -> bool {
        self.loader.load(manifest).await
    }

    pub async fn reload(&self, name: &str) -> Result<bool, SandboxError> {
        self.loader.reload_by_name(name).await
    }

    pub async fn load_all(&self, manifests: &[PluginManifest]) -> LoadSummary {
        self.loader.load_all(manifests).await
    }

    pub async fn load_directory(&self, dir: &Path) -> Result<LoadSummary, SandboxError> {
        self.loader.load_directory(dir).await
    }

    pub async fn execute(
        &self,
        name: &str,
        operation: &str,
        input: Value,
        requested: Device,
    ) -> ExecutionOutcome {
        self.executor.execute(name, operation, input, requested).await
    }

    pub async fn execute_with_context(
        &self,
        context: ExecutionContext,
        input: Value,
        requested: Device,
    ) -> ExecutionOutcome {
        self.executor
            .execute_with_context(context, input, requested)
            .await
    }

    /// 注销插件并忘记其清单
    pub async fn unregister(&self, name: &str) -> bool {
        self.loader.forget(name).await;
        self.registry.unregister(name).await
    }

    pub async fn list_all(&self) -> Vec<PluginHealthRecord> {
        self.health.list_all().await
    }

    pub async fn get_status(&self, name: &str) -> Option<PluginHealthRecord> {
        self.health.get_status(name).await
    }

    pub async fn summary(&self) -> HealthSummary {
        self.health.summary().await
    }
}
