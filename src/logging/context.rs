// 日志上下文管理

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 执行上下文
/// 一次插件调用的标识信息，贯穿设备决策和执行日志
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub request_id: String,
    pub job_id: Option<String>,
    pub plugin: String,
    pub operation: String,
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    /// 创建新的执行上下文
    pub fn new(plugin: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            job_id: None,
            plugin: plugin.into(),
            operation: operation.into(),
            started_at: Utc::now(),
        }
    }

    /// 使用调用方已有的请求 ID
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// 设置任务 ID
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// 获取持续时间
    pub fn duration(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// 转换为日志字段
    pub fn to_log_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("request_id", self.request_id.clone()),
            ("plugin", self.plugin.clone()),
            ("operation", self.operation.clone()),
            ("started_at", self.started_at.to_rfc3339()),
        ];

        if let Some(ref job_id) = self.job_id {
            fields.push(("job_id", job_id.clone()));
        }

        fields
    }
}

/// 日志上下文宏
#[macro_export]
macro_rules! log_with_context {
    ($level:ident, $context:expr, $($arg:tt)*) => {
        tracing::$level!(
            request_id = %$context.request_id,
            job_id = ?$context.job_id,
            plugin = %$context.plugin,
            operation = %$context.operation,
            $($arg)*
        );
    };
}

/// 创建带上下文的 span
#[macro_export]
macro_rules! span_with_context {
    ($level:ident, $name:expr, $context:expr) => {
        tracing::span!(
            tracing::Level::$level,
            $name,
            request_id = %$context.request_id,
            job_id = ?$context.job_id,
            plugin = %$context.plugin,
            operation = %$context.operation,
        )
    };
}
