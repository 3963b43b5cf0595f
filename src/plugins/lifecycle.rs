// 插件生命周期管理
// 实现插件的生命周期状态存储和转换规则

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SandboxError;

/// 插件生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// 已注册，尚未完成初始化
    Loaded,
    /// 已初始化，可以执行
    Initialized,
    /// 已开始处理执行请求
    Running,
    /// 加载或运行时出现意外故障（可能是暂时性的）
    Failed,
    /// 当前环境无法使用（缺少依赖、硬件或模型）
    Unavailable,
}

impl PluginState {
    /// 是否可以接受执行请求
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Loaded | Self::Initialized | Self::Running)
    }

    /// 是否必须携带原因
    pub fn requires_reason(&self) -> bool {
        matches!(self, Self::Failed | Self::Unavailable)
    }

    /// 状态转换规则
    ///
    /// 任何状态都可以回到 Loaded（注册或重新加载），
    /// Failed 和 Unavailable 除此之外不允许任何转换。
    pub fn can_transition_to(&self, next: PluginState) -> bool {
        use PluginState::*;

        match (self, next) {
            (_, Loaded) => true,
            (Loaded, Initialized | Failed | Unavailable) => true,
            (Initialized, Running | Failed | Unavailable) => true,
            (Running, Running | Failed | Unavailable) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生命周期状态转换记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusTransition {
    /// 插件名称
    pub plugin: String,
    /// 从状态（首次注册时为空）
    pub from: Option<PluginState>,
    /// 到状态
    pub to: PluginState,
    /// 转换原因
    pub reason: Option<String>,
    /// 转换时间
    pub timestamp: DateTime<Utc>,
}

/// 单个插件的生命周期条目
#[derive(Debug, Clone)]
struct LifecycleEntry {
    state: PluginState,
    reason: Option<String>,
    changed_at: DateTime<Utc>,
    history: VecDeque<StatusTransition>,
}

/// 生命周期存储
///
/// 纯数据结构，不做任何加锁，由注册表在自己的锁内修改。
#[derive(Debug, Clone)]
pub struct LifecycleStore {
    entries: HashMap<String, LifecycleEntry>,
    history_limit: usize,
}

impl LifecycleStore {
    /// 创建新的生命周期存储
    pub fn new(history_limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// 设置插件状态
    ///
    /// Failed / Unavailable 必须提供非空原因，其他状态会清除原因。
    /// 未知插件的第一个状态必须是 Loaded。
    pub fn set_state(
        &mut self,
        name: &str,
        state: PluginState,
        reason: Option<&str>,
    ) -> Result<(), SandboxError> {
        let reason = if state.requires_reason() {
            match reason.map(str::trim).filter(|r| !r.is_empty()) {
                Some(reason) => Some(reason.to_string()),
                None => return Err(SandboxError::missing_reason(name, state.as_str())),
            }
        } else {
            None
        };

        let now = Utc::now();

        let entry = match self.entries.get_mut(name) {
            Some(entry) => entry,
            None => {
                if state != PluginState::Loaded {
                    return Err(SandboxError::invalid_transition(name, "absent", state.as_str()));
                }

                let mut history = VecDeque::new();
                history.push_back(StatusTransition {
                    plugin: name.to_string(),
                    from: None,
                    to: state,
                    reason: None,
                    timestamp: now,
                });

                self.entries.insert(
                    name.to_string(),
                    LifecycleEntry {
                        state,
                        reason: None,
                        changed_at: now,
                        history,
                    },
                );
                return Ok(());
            }
        };

        let from = entry.state;
        if !from.can_transition_to(state) {
            return Err(SandboxError::invalid_transition(name, from.as_str(), state.as_str()));
        }

        // 连续执行时 Running -> Running 不产生新记录
        if from == state && from != PluginState::Loaded && entry.reason == reason {
            return Ok(());
        }

        entry.state = state;
        entry.reason = reason.clone();
        entry.changed_at = now;
        entry.history.push_back(StatusTransition {
            plugin: name.to_string(),
            from: Some(from),
            to: state,
            reason,
            timestamp: now,
        });

        while entry.history.len() > self.history_limit {
            entry.history.pop_front();
        }

        Ok(())
    }

    /// 获取插件状态
    pub fn get_state(&self, name: &str) -> Option<PluginState> {
        self.entries.get(name).map(|entry| entry.state)
    }

    /// 获取不可用 / 失败原因
    pub fn reason(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(|entry| entry.reason.as_deref())
    }

    /// 最后一次状态变更时间
    pub fn changed_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.get(name).map(|entry| entry.changed_at)
    }

    /// 获取状态转换历史（从旧到新）
    pub fn transitions(&self, name: &str) -> Vec<StatusTransition> {
        self.entries
            .get(name)
            .map(|entry| entry.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 移除插件
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LifecycleStore {
    fn default() -> Self {
        Self::new(50)
    }
}
