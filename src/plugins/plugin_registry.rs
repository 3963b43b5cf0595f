// 插件注册表
// 保存插件记录、生命周期状态和执行统计，所有读写共用一把读写锁

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use plugin_sandbox_common::Device;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::plugins::device::DeviceDecision;
use crate::plugins::lifecycle::{LifecycleStore, PluginState, StatusTransition};
use crate::plugins::plugin_interface::Plugin;

/// 运行时故障处理策略
///
/// 只作用于插件调用期间的故障。请求插件未声明的操作会在调用前被拒绝，
/// 两种策略下都只计入错误次数，不改变插件状态。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeFaultPolicy {
    /// 只记录错误，插件保持可用
    #[default]
    KeepAvailable,
    /// 将插件标记为 Failed，重新加载前拒绝执行
    MarkFailed,
}

/// 注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// 每个插件保留的最近执行耗时数量
    pub execution_history_size: usize,
    /// 每个插件保留的状态转换记录数量
    pub transition_history_size: usize,
    /// 运行时故障处理策略
    pub runtime_fault_policy: RuntimeFaultPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            execution_history_size: 10,
            transition_history_size: 50,
            runtime_fault_policy: RuntimeFaultPolicy::default(),
        }
    }
}

/// 注册表内部条目
struct PluginEntry {
    description: String,
    version: String,
    loaded_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    success_count: u64,
    error_count: u64,
    recent_execution_times: VecDeque<f64>,
    instance: Option<Arc<dyn Plugin>>,
    fallback_count: u64,
    last_device: Option<Device>,
    last_error: Option<String>,
}

impl PluginEntry {
    fn new(description: String, version: String) -> Self {
        Self {
            description,
            version,
            loaded_at: Utc::now(),
            last_used_at: None,
            success_count: 0,
            error_count: 0,
            recent_execution_times: VecDeque::new(),
            instance: None,
            fallback_count: 0,
            last_device: None,
            last_error: None,
        }
    }

    fn record_device(&mut self, decision: &DeviceDecision) {
        self.last_device = Some(decision.used);
        if decision.fallback_occurred {
            self.fallback_count += 1;
        }
    }

    fn push_execution_time(&mut self, duration_ms: Option<f64>, limit: usize) {
        if let Some(duration) = duration_ms.filter(|d| d.is_finite() && *d >= 0.0) {
            self.recent_execution_times.push_back(duration);
            while self.recent_execution_times.len() > limit {
                self.recent_execution_times.pop_front();
            }
        }
    }
}

struct RegistryState {
    plugins: HashMap<String, PluginEntry>,
    lifecycle: LifecycleStore,
}

impl RegistryState {
    fn snapshot(&self, name: &str) -> Option<PluginRecord> {
        let entry = self.plugins.get(name)?;
        let state = self.lifecycle.get_state(name)?;

        Some(PluginRecord {
            name: name.to_string(),
            description: entry.description.clone(),
            version: entry.version.clone(),
            state,
            unavailable_reason: self.lifecycle.reason(name).map(str::to_string),
            loaded_at: entry.loaded_at,
            last_used_at: entry.last_used_at,
            success_count: entry.success_count,
            error_count: entry.error_count,
            recent_execution_times: entry.recent_execution_times.iter().copied().collect(),
            has_instance: entry.instance.is_some(),
            fallback_count: entry.fallback_count,
            last_device: entry.last_device,
            last_error: entry.last_error.clone(),
            state_changed_at: self.lifecycle.changed_at(name).unwrap_or(entry.loaded_at),
        })
    }

    /// 执行状态转换，非法转换只记录警告
    fn transition(&mut self, name: &str, state: PluginState, reason: Option<&str>) -> bool {
        if !self.plugins.contains_key(name) {
            warn!("插件未注册，忽略状态变更: {} -> {}", name, state);
            return false;
        }

        match self.lifecycle.set_state(name, state, reason) {
            Ok(()) => {
                if !state.is_available() {
                    if let Some(entry) = self.plugins.get_mut(name) {
                        entry.instance = None;
                    }
                }
                true
            }
            Err(e) => {
                warn!("插件状态变更被拒绝: {} - {}", name, e);
                false
            }
        }
    }
}

/// 插件记录快照
#[derive(Debug, Clone, Serialize)]
pub struct PluginRecord {
    pub name: String,
    pub description: String,
    pub version: String,
    pub state: PluginState,
    pub unavailable_reason: Option<String>,
    pub loaded_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub error_count: u64,
    /// 最近的执行耗时（毫秒，从旧到新）
    pub recent_execution_times: Vec<f64>,
    pub has_instance: bool,
    /// 设备降级次数
    pub fallback_count: u64,
    pub last_device: Option<Device>,
    pub last_error: Option<String>,
    pub state_changed_at: DateTime<Utc>,
}

impl PluginRecord {
    pub fn last_execution_time_ms(&self) -> Option<f64> {
        self.recent_execution_times.last().copied()
    }

    /// 最近执行耗时的平均值
    pub fn avg_execution_time_ms(&self) -> Option<f64> {
        if self.recent_execution_times.is_empty() {
            return None;
        }
        let total: f64 = self.recent_execution_times.iter().sum();
        Some(total / self.recent_execution_times.len() as f64)
    }

    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = now.signed_duration_since(self.loaded_at);
        (elapsed.num_milliseconds().max(0) as f64) / 1000.0
    }

    pub fn is_available(&self) -> bool {
        self.state.is_available()
    }
}

/// 插件注册表
///
/// 克隆得到的是同一个注册表的句柄。
#[derive(Clone)]
pub struct PluginRegistry {
    state: Arc<RwLock<RegistryState>>,
    config: RegistryConfig,
}

impl PluginRegistry {
    /// 创建新的插件注册表
    pub fn new(config: Option<RegistryConfig>) -> Self {
        let config = config.unwrap_or_default();
        let execution_history_size = config.execution_history_size.max(1);
        let config = RegistryConfig {
            execution_history_size,
            ..config
        };

        Self {
            state: Arc::new(RwLock::new(RegistryState {
                plugins: HashMap::new(),
                lifecycle: LifecycleStore::new(config.transition_history_size),
            })),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// 注册插件
    ///
    /// 已存在的同名插件会被覆盖，统计和实例全部重置，状态回到 Loaded。
    pub async fn register(
        &self,
        name: &str,
        description: impl Into<String>,
        version: impl Into<String>,
    ) {
        let mut state = self.state.write().await;

        if state.plugins.contains_key(name) {
            warn!("插件已注册，覆盖原有记录: {}", name);
        }

        state
            .plugins
            .insert(name.to_string(), PluginEntry::new(description.into(), version.into()));

        if let Err(e) = state.lifecycle.set_state(name, PluginState::Loaded, None) {
            warn!("插件注册状态写入失败: {} - {}", name, e);
        }

        info!("插件已注册: {}", name);
    }

    /// 注销插件
    pub async fn unregister(&self, name: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state.plugins.remove(name).is_some();
        state.lifecycle.remove(name);

        if removed {
            info!("插件已注销: {}", name);
        } else {
            debug!("注销未知插件: {}", name);
        }
        removed
    }

    pub async fn mark_initialized(&self, name: &str) -> bool {
        let changed = self
            .state
            .write()
            .await
            .transition(name, PluginState::Initialized, None);
        if changed {
            info!("插件初始化完成: {}", name);
        }
        changed
    }

    pub async fn mark_running(&self, name: &str) -> bool {
        self.state
            .write()
            .await
            .transition(name, PluginState::Running, None)
    }

    /// 标记插件失败，原因不能为空
    pub async fn mark_failed(&self, name: &str, reason: &str) -> bool {
        let changed = self
            .state
            .write()
            .await
            .transition(name, PluginState::Failed, Some(reason));
        if changed {
            warn!("插件已标记为失败: {} - {}", name, reason);
        }
        changed
    }

    /// 标记插件不可用，原因不能为空
    pub async fn mark_unavailable(&self, name: &str, reason: &str) -> bool {
        let changed = self
            .state
            .write()
            .await
            .transition(name, PluginState::Unavailable, Some(reason));
        if changed {
            warn!("插件不可用: {} - {}", name, reason);
        }
        changed
    }

    /// 完成加载：在同一次加锁中保存实例并切换到 Initialized
    ///
    /// 只接受仍处于 Loaded 的插件，加载期间被重新注册或标记失败时返回 false。
    pub async fn complete_load(&self, name: &str, instance: Arc<dyn Plugin>) -> bool {
        let mut state = self.state.write().await;

        match state.lifecycle.get_state(name) {
            Some(PluginState::Loaded) => {}
            Some(current) => {
                warn!("插件处于 {} 状态，拒绝保存实例: {}", current, name);
                return false;
            }
            None => {
                warn!("插件未注册，拒绝保存实例: {}", name);
                return false;
            }
        }

        if !state.transition(name, PluginState::Initialized, None) {
            return false;
        }

        match state.plugins.get_mut(name) {
            Some(entry) => {
                entry.instance = Some(instance);
                info!("插件初始化完成: {}", name);
                true
            }
            None => false,
        }
    }

    pub async fn instance(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let state = self.state.read().await;
        state.plugins.get(name).and_then(|entry| entry.instance.clone())
    }

    /// 记录一次成功执行
    pub async fn record_success(&self, name: &str, duration_ms: Option<f64>) {
        let limit = self.config.execution_history_size;
        let mut state = self.state.write().await;

        match state.plugins.get_mut(name) {
            Some(entry) => {
                entry.success_count += 1;
                entry.last_used_at = Some(Utc::now());
                entry.push_execution_time(duration_ms, limit);
            }
            None => debug!("插件未注册，忽略执行记录: {}", name),
        }
    }

    /// 记录一次失败执行
    pub async fn record_error(&self, name: &str, duration_ms: Option<f64>) {
        self.record_error_inner(name, duration_ms, None).await;
    }

    pub async fn record_error_with_message(
        &self,
        name: &str,
        duration_ms: Option<f64>,
        message: &str,
    ) {
        self.record_error_inner(name, duration_ms, Some(message)).await;
    }

    async fn record_error_inner(&self, name: &str, duration_ms: Option<f64>, message: Option<&str>) {
        let limit = self.config.execution_history_size;
        let mut state = self.state.write().await;

        match state.plugins.get_mut(name) {
            Some(entry) => {
                entry.error_count += 1;
                entry.last_used_at = Some(Utc::now());
                entry.push_execution_time(duration_ms, limit);
                if let Some(message) = message {
                    entry.last_error = Some(message.to_string());
                }
            }
            None => debug!("插件未注册，忽略错误记录: {}", name),
        }
    }

    /// 开始一次执行：在同一次加锁中切换到 Running 并记录设备
    ///
    /// 插件在此期间变为不可用时返回 false。
    pub(crate) async fn begin_execution(&self, name: &str, decision: &DeviceDecision) -> bool {
        let mut state = self.state.write().await;

        let ready = state
            .plugins
            .get(name)
            .is_some_and(|entry| entry.instance.is_some());
        if !ready || !state.transition(name, PluginState::Running, None) {
            return false;
        }

        match state.plugins.get_mut(name) {
            Some(entry) => {
                entry.record_device(decision);
                true
            }
            None => false,
        }
    }

    /// 获取可以执行的插件实例，不可执行时返回原因
    pub(crate) async fn execution_target(&self, name: &str) -> Result<Arc<dyn Plugin>, String> {
        let state = self.state.read().await;

        let entry = state
            .plugins
            .get(name)
            .ok_or_else(|| format!("插件未注册: {}", name))?;
        let current = state
            .lifecycle
            .get_state(name)
            .ok_or_else(|| format!("插件未注册: {}", name))?;

        if !current.is_available() {
            let reason = state.lifecycle.reason(name).unwrap_or("未知原因");
            return Err(format!("插件处于 {} 状态: {}", current, reason));
        }

        entry
            .instance
            .clone()
            .ok_or_else(|| format!("插件尚未完成初始化: {}", name))
    }

    /// 获取插件记录快照
    pub async fn get_status(&self, name: &str) -> Option<PluginRecord> {
        self.state.read().await.snapshot(name)
    }

    pub async fn get_state(&self, name: &str) -> Option<PluginState> {
        self.state.read().await.lifecycle.get_state(name)
    }

    pub async fn unavailable_reason(&self, name: &str) -> Option<String> {
        let state = self.state.read().await;
        state.lifecycle.reason(name).map(str::to_string)
    }

    /// 所有插件记录，按名称排序
    pub async fn list_all(&self) -> Vec<PluginRecord> {
        let state = self.state.read().await;
        let mut names: Vec<&String> = state.plugins.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| state.snapshot(name))
            .collect()
    }

    pub async fn is_available(&self, name: &str) -> bool {
        self.get_state(name)
            .await
            .is_some_and(|state| state.is_available())
    }

    pub async fn transitions(&self, name: &str) -> Vec<StatusTransition> {
        self.state.read().await.lifecycle.transitions(name)
    }

    pub async fn names(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.plugins.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.plugins.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::plugin_interface::PluginFault;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        async fn call(&self, _operation: &str, input: Value, _device: Device) -> Result<Value, PluginFault> {
            Ok(input)
        }
    }

    async fn ready_registry(name: &str) -> PluginRegistry {
        let registry = PluginRegistry::default();
        registry.register(name, "echo plugin", "1.0.0").await;
        assert!(registry.complete_load(name, Arc::new(Echo)).await);
        registry
    }

    #[tokio::test]
    async fn test_register_creates_loaded_record() {
        let registry = PluginRegistry::default();
        registry.register("ocr", "文字识别", "0.3.1").await;

        let record = registry.get_status("ocr").await.unwrap();
        assert_eq!(record.state, PluginState::Loaded);
        assert_eq!(record.version, "0.3.1");
        assert_eq!(record.success_count, 0);
        assert!(record.unavailable_reason.is_none());
        assert!(!record.has_instance);
    }

    #[tokio::test]
    async fn test_reregister_resets_record() {
        let registry = ready_registry("ocr").await;
        registry.record_success("ocr", Some(12.0)).await;
        registry.mark_failed("ocr", "RuntimeError: boom").await;

        registry.register("ocr", "文字识别", "0.4.0").await;
        let record = registry.get_status("ocr").await.unwrap();
        assert_eq!(record.state, PluginState::Loaded);
        assert_eq!(record.success_count, 0);
        assert_eq!(record.version, "0.4.0");
        assert!(record.unavailable_reason.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_plugin_operations_are_noops() {
        let registry = PluginRegistry::default();
        assert!(!registry.mark_initialized("ghost").await);
        assert!(!registry.mark_failed("ghost", "reason").await);
        registry.record_success("ghost", Some(1.0)).await;
        registry.record_error("ghost", None).await;

        assert!(registry.get_status("ghost").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_complete_load_is_atomic() {
        let registry = PluginRegistry::default();
        registry.register("ocr", "", "1.0.0").await;

        // 未完成加载的插件不能进入 Running
        let decision = DeviceDecision::direct(Device::Baseline);
        assert!(!registry.begin_execution("ocr", &decision).await);
        assert_eq!(registry.get_state("ocr").await, Some(PluginState::Loaded));

        assert!(registry.complete_load("ocr", Arc::new(Echo)).await);
        let record = registry.get_status("ocr").await.unwrap();
        assert_eq!(record.state, PluginState::Initialized);
        assert!(record.has_instance);

        assert!(registry.begin_execution("ocr", &decision).await);
        assert!(!registry.complete_load("ocr", Arc::new(Echo)).await);
        assert_eq!(registry.get_state("ocr").await, Some(PluginState::Running));

        registry.register("ocr", "", "1.0.0").await;
        registry.mark_failed("ocr", "RuntimeError: boom").await;
        assert!(!registry.complete_load("ocr", Arc::new(Echo)).await);
        assert!(!registry.get_status("ocr").await.unwrap().has_instance);
        assert!(!registry.complete_load("ghost", Arc::new(Echo)).await);
    }

    #[tokio::test]
    async fn test_failed_requires_reason_and_drops_instance() {
        let registry = ready_registry("ocr").await;

        assert!(!registry.mark_failed("ocr", "  ").await);
        assert_eq!(registry.get_state("ocr").await, Some(PluginState::Initialized));

        assert!(registry.mark_failed("ocr", "ValueError: corrupt weights").await);
        let record = registry.get_status("ocr").await.unwrap();
        assert_eq!(record.state, PluginState::Failed);
        assert_eq!(record.unavailable_reason.as_deref(), Some("ValueError: corrupt weights"));
        assert!(!record.has_instance);
        assert!(registry.execution_target("ocr").await.is_err());
    }

    #[tokio::test]
    async fn test_execution_history_is_bounded() {
        let registry = ready_registry("ocr").await;
        for i in 1..=15 {
            registry.record_success("ocr", Some(i as f64)).await;
        }

        let record = registry.get_status("ocr").await.unwrap();
        assert_eq!(record.success_count, 15);
        assert_eq!(record.recent_execution_times.len(), 10);
        assert_eq!(record.last_execution_time_ms(), Some(15.0));
        assert_eq!(record.avg_execution_time_ms(), Some(10.5));
    }

    #[tokio::test]
    async fn test_error_without_duration_only_counts() {
        let registry = ready_registry("ocr").await;
        registry.record_error_with_message("ocr", None, "RuntimeError: boom").await;

        let record = registry.get_status("ocr").await.unwrap();
        assert_eq!(record.error_count, 1);
        assert!(record.recent_execution_times.is_empty());
        assert_eq!(record.last_error.as_deref(), Some("RuntimeError: boom"));
        assert!(record.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_begin_execution_records_device() {
        let registry = ready_registry("ocr").await;
        let decision = DeviceDecision {
            requested: Device::Accelerated,
            used: Device::Baseline,
            fallback_occurred: true,
        };

        assert!(registry.begin_execution("ocr", &decision).await);
        let record = registry.get_status("ocr").await.unwrap();
        assert_eq!(record.state, PluginState::Running);
        assert_eq!(record.fallback_count, 1);
        assert_eq!(record.last_device, Some(Device::Baseline));

        registry.mark_unavailable("ocr", "模型文件被删除").await;
        assert!(!registry.begin_execution("ocr", &decision).await);
    }

    #[tokio::test]
    async fn test_list_all_is_sorted() {
        let registry = PluginRegistry::default();
        for name in ["tracker", "asr", "ocr"] {
            registry.register(name, "", "1.0.0").await;
        }

        let names: Vec<String> = registry.list_all().await.into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["asr", "ocr", "tracker"]);

        assert!(registry.unregister("asr").await);
        assert!(!registry.unregister("asr").await);
        assert_eq!(registry.names().await, vec!["ocr", "tracker"]);
    }

    #[test]
    fn test_runtime_fault_policy_serialization() {
        let json = serde_json::to_string(&RuntimeFaultPolicy::MarkFailed).unwrap();
        assert_eq!(json, "\"mark_failed\"");
        assert_eq!(RuntimeFaultPolicy::default(), RuntimeFaultPolicy::KeepAvailable);
    }
}
