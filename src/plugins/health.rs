// 插件健康状态
// 从注册表快照生成面向运维的健康记录

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::plugins::lifecycle::PluginState;
use crate::plugins::plugin_registry::{PluginRecord, PluginRegistry};

/// 单个插件的健康记录
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PluginHealthRecord {
    pub name: String,
    pub state: PluginState,
    pub description: String,
    pub version: String,
    /// 失败或不可用原因
    pub reason: Option<String>,
    pub success_count: u64,
    pub error_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
    pub last_execution_time_ms: Option<f64>,
    pub avg_execution_time_ms: Option<f64>,
    pub fallback_count: u64,
}

impl PluginHealthRecord {
    fn from_record(record: &PluginRecord, now: DateTime<Utc>) -> Self {
        Self {
            name: record.name.clone(),
            state: record.state,
            description: record.description.clone(),
            version: record.version.clone(),
            reason: record.unavailable_reason.clone(),
            success_count: record.success_count,
            error_count: record.error_count,
            last_used_at: record.last_used_at,
            uptime_seconds: record.uptime_seconds(now),
            last_execution_time_ms: record.last_execution_time_ms(),
            avg_execution_time_ms: record.avg_execution_time_ms(),
            fallback_count: record.fallback_count,
        }
    }

    pub fn is_available(&self) -> bool {
        self.state.is_available()
    }
}

/// 所有插件的健康汇总
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthSummary {
    pub total: usize,
    pub available: usize,
    pub loaded: usize,
    pub initialized: usize,
    pub running: usize,
    pub failed: usize,
    pub unavailable: usize,
    pub total_successes: u64,
    pub total_errors: u64,
    /// 没有处于 Failed 状态的插件
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
}

/// 健康检查服务
#[derive(Clone)]
pub struct HealthService {
    registry: PluginRegistry,
}

impl HealthService {
    pub fn new(registry: PluginRegistry) -> Self {
        Self { registry }
    }

    /// 所有插件的健康记录，按名称排序
    pub async fn list_all(&self) -> Vec<PluginHealthRecord> {
        let now = Utc::now();
        self.registry
            .list_all()
            .await
            .iter()
            .map(|record| PluginHealthRecord::from_record(record, now))
            .collect()
    }

    pub async fn get_status(&self, name: &str) -> Option<PluginHealthRecord> {
        let record = self.registry.get_status(name).await?;
        Some(PluginHealthRecord::from_record(&record, Utc::now()))
    }

    /// 健康汇总
    pub async fn summary(&self) -> HealthSummary {
        let records = self.registry.list_all().await;
        let count = |state: PluginState| records.iter().filter(|r| r.state == state).count();

        let failed = count(PluginState::Failed);
        HealthSummary {
            total: records.len(),
            available: records.iter().filter(|r| r.is_available()).count(),
            loaded: count(PluginState::Loaded),
            initialized: count(PluginState::Initialized),
            running: count(PluginState::Running),
            failed,
            unavailable: count(PluginState::Unavailable),
            total_successes: records.iter().map(|r| r.success_count).sum(),
            total_errors: records.iter().map(|r| r.error_count).sum(),
            healthy: failed == 0,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::OcrPlugin;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health_record_fields() {
        let registry = PluginRegistry::default();
        registry.register("ocr", "文字识别", "1.2.0").await;
        registry.complete_load("ocr", Arc::new(OcrPlugin)).await;
        registry.record_success("ocr", Some(20.0)).await;
        registry.record_success("ocr", Some(40.0)).await;
        registry.record_error("ocr", Some(30.0)).await;

        let health = HealthService::new(registry);
        let record = health.get_status("ocr").await.unwrap();

        assert_eq!(record.state, PluginState::Initialized);
        assert_eq!(record.success_count, 2);
        assert_eq!(record.error_count, 1);
        assert_eq!(record.last_execution_time_ms, Some(30.0));
        assert_eq!(record.avg_execution_time_ms, Some(30.0));
        assert!(record.uptime_seconds >= 0.0);
        assert!(record.reason.is_none());
        assert!(health.get_status("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_summary_counts_states() {
        let registry = PluginRegistry::default();
        for name in ["asr", "ocr", "tracker"] {
            registry.register(name, "", "1.0.0").await;
        }
        registry.mark_unavailable("tracker", "未检测到加速设备 (accelerator)").await;

        let health = HealthService::new(registry.clone());
        let summary = health.summary().await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.available, 2);
        assert_eq!(summary.unavailable, 1);
        assert!(summary.healthy);

        registry.mark_failed("asr", "ImportFailure: 未注册的插件工厂 'asr'").await;
        let summary = health.summary().await;
        assert_eq!(summary.failed, 1);
        assert!(!summary.healthy);

        let names: Vec<String> = health.list_all().await.into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["asr", "ocr", "tracker"]);
    }
}
