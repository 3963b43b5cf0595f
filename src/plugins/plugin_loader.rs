// 插件加载器
// 按清单检查依赖、构造插件实例并写入注册表

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use plugin_sandbox_common::ErrorKind;
use serde::Serialize;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::errors::SandboxError;
use crate::plugins::dependency::DependencyResolver;
use crate::plugins::lifecycle::PluginState;
use crate::plugins::plugin_interface::{
    FactoryCatalog, Plugin, PluginFactory, PluginFault, PluginManifest,
};
use crate::plugins::plugin_registry::PluginRegistry;

/// 批量加载结果
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LoadSummary {
    /// 初始化完成的插件
    pub loaded: Vec<String>,
    /// 当前环境不可用的插件
    pub unavailable: Vec<String>,
    /// 加载失败的插件
    pub failed: Vec<String>,
    /// 清单无效、没有写入注册表的插件
    pub rejected: Vec<String>,
}

impl LoadSummary {
    pub fn total(&self) -> usize {
        self.loaded.len() + self.unavailable.len() + self.failed.len() + self.rejected.len()
    }
}

/// 插件加载器
#[derive(Clone)]
pub struct PluginLoader {
    registry: PluginRegistry,
    resolver: DependencyResolver,
    factories: Arc<RwLock<FactoryCatalog>>,
    manifests: Arc<RwLock<HashMap<String, PluginManifest>>>,
}

impl PluginLoader {
    /// 创建新的插件加载器
    pub fn new(registry: PluginRegistry, resolver: DependencyResolver) -> Self {
        Self {
            registry,
            resolver,
            factories: Arc::new(RwLock::new(FactoryCatalog::new())),
            manifests: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 注册插件工厂
    pub async fn register_factory(&self, name: &str, factory: Arc<dyn PluginFactory>) {
        if self.factories.write().await.register(name, factory) {
            warn!("插件工厂已存在，覆盖: {}", name);
        } else {
            debug!("注册插件工厂: {}", name);
        }
    }

    /// 使用闭包注册插件工厂
    pub async fn register_fn<F>(&self, name: &str, factory: F)
    where
        F: Fn(&PluginManifest) -> Result<Arc<dyn Plugin>, PluginFault> + Send + Sync + 'static,
    {
        self.register_factory(name, Arc::new(factory)).await;
    }

    pub async fn factory_names(&self) -> Vec<String> {
        self.factories.read().await.names()
    }

    /// 加载插件
    ///
    /// 插件最终处于 Initialized 时返回 true。加载过程中的任何故障
    /// 都只会体现在该插件的状态上，不会向调用方传播。
    pub async fn load(&self, manifest: &PluginManifest) -> bool {
        if let Err(e) = manifest.validate() {
            error!("插件清单无效，跳过加载: {}", e);
            return false;
        }

        let name = manifest.name.as_str();
        let started = Instant::now();
        info!("加载插件: {} v{}", name, manifest.version);

        self.manifests
            .write()
            .await
            .insert(name.to_string(), manifest.clone());
        self.registry
            .register(name, manifest.description.clone(), manifest.version.clone())
            .await;

        let report = self.resolver.check(&manifest.requirements()).await;
        if !report.available {
            let reason = report
                .reason
                .unwrap_or_else(|| "环境不满足插件要求".to_string());
            self.registry.mark_unavailable(name, &reason).await;
            return false;
        }

        let factory_name = manifest.factory_name();
        let factory = self.factories.read().await.get(factory_name);
        let Some(factory) = factory else {
            let reason = format!(
                "{}: 未注册的插件工厂 '{}'",
                ErrorKind::ImportFailure,
                factory_name
            );
            self.registry.mark_failed(name, &reason).await;
            return false;
        };

        let instance = match Self::construct(factory, manifest.clone()).await {
            Ok(instance) => instance,
            Err(fault) => {
                self.record_construction_fault(name, fault).await;
                return false;
            }
        };

        if let Err(fault) = Self::run_validation_hook(&instance).await {
            self.record_construction_fault(name, fault).await;
            return false;
        }

        if !self.registry.complete_load(name, instance).await {
            warn!("插件在加载期间状态发生变化: {}", name);
            return false;
        }

        info!(
            "插件加载成功: {} ({}ms)",
            name,
            started.elapsed().as_millis()
        );
        true
    }

    /// 在阻塞线程中调用工厂，工厂中的 panic 转换为故障
    async fn construct(
        factory: Arc<dyn PluginFactory>,
        manifest: PluginManifest,
    ) -> Result<Arc<dyn Plugin>, PluginFault> {
        match tokio::task::spawn_blocking(move || factory.create(&manifest)).await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                Err(PluginFault::from_panic(join_error.into_panic()))
            }
            Err(join_error) => Err(PluginFault::initialization(format!(
                "插件构造任务被取消: {}",
                join_error
            ))),
        }
    }

    /// 运行插件声明的验证钩子，钩子内的 panic 转换为故障
    async fn run_validation_hook(instance: &Arc<dyn Plugin>) -> Result<(), PluginFault> {
        let has_hook = std::panic::catch_unwind(AssertUnwindSafe(|| instance.has_validation_hook()))
            .map_err(PluginFault::from_panic)?;
        if !has_hook {
            return Ok(());
        }

        AssertUnwindSafe(async { instance.validate().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(PluginFault::from_panic(payload)))
    }

    /// 环境类故障标记为不可用，其他故障标记为失败
    async fn record_construction_fault(&self, name: &str, fault: PluginFault) {
        let kind = match fault.kind {
            ErrorKind::RuntimeFault | ErrorKind::PluginUnavailable => {
                ErrorKind::InitializationFailure
            }
            kind => kind,
        };
        let reason = format!("{}: {}", kind, fault);

        if kind.is_environmental() {
            self.registry.mark_unavailable(name, &reason).await;
        } else {
            self.registry.mark_failed(name, &reason).await;
        }
    }

    /// 使用新的清单重新加载
    pub async fn reload(&self, manifest: &PluginManifest) -> bool {
        info!("重新加载插件: {}", manifest.name);
        self.load(manifest).await
    }

    /// 使用上次的清单重新加载
    pub async fn reload_by_name(&self, name: &str) -> Result<bool, SandboxError> {
        let manifest = self
            .manifests
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::not_found(format!("插件清单: {}", name)))?;

        Ok(self.reload(&manifest).await)
    }

    /// 忘记插件清单
    pub async fn forget(&self, name: &str) -> bool {
        self.manifests.write().await.remove(name).is_some()
    }

    pub async fn manifest(&self, name: &str) -> Option<PluginManifest> {
        self.manifests.read().await.get(name).cloned()
    }

    /// 并发加载一组插件
    pub async fn load_all(&self, manifests: &[PluginManifest]) -> LoadSummary {
        join_all(manifests.iter().map(|manifest| self.load(manifest))).await;

        let mut summary = LoadSummary::default();
        for manifest in manifests {
            let name = manifest.name.clone();
            if manifest.validate().is_err() {
                summary.rejected.push(name);
                continue;
            }

            match self.registry.get_state(&name).await {
                Some(PluginState::Unavailable) => summary.unavailable.push(name),
                Some(PluginState::Failed) | None => summary.failed.push(name),
                Some(_) => summary.loaded.push(name),
            }
        }

        info!(
            "批量加载完成: {} 个可用, {} 个不可用, {} 个失败, {} 个无效",
            summary.loaded.len(),
            summary.unavailable.len(),
            summary.failed.len(),
            summary.rejected.len()
        );
        summary
    }

    /// 扫描目录中的 JSON 插件清单
    ///
    /// 无法解析的文件会被跳过，结果按插件名称排序。
    pub async fn scan_manifests(&self, dir: &Path) -> Result<Vec<PluginManifest>, SandboxError> {
        debug!("扫描插件清单目录: {}", dir.display());

        let mut manifests = Vec::new();

        if !dir.exists() {
            warn!("插件清单目录不存在: {}", dir.display());
            return Ok(manifests);
        }

        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| SandboxError::io(format!("读取插件清单目录失败: {}", e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SandboxError::io(format!("读取目录条目失败: {}", e)))?
        {
            let path = entry.path();
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if !is_json || !path.is_file() {
                continue;
            }

            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("读取插件清单失败: {} - {}", path.display(), e);
                    continue;
                }
            };

            match serde_json::from_str::<PluginManifest>(&content) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => warn!("解析插件清单失败: {} - {}", path.display(), e),
            }
        }

        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        info!("扫描到 {} 个插件清单", manifests.len());

        Ok(manifests)
    }

    /// 扫描目录并加载其中的全部插件
    pub async fn load_directory(&self, dir: &Path) -> Result<LoadSummary, SandboxError> {
        let manifests = self.scan_manifests(dir).await?;
        Ok(self.load_all(&manifests).await)
    }
}
