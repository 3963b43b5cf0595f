// 插件依赖解析
// 检查依赖包、加速设备和模型文件是否满足插件要求

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use plugin_sandbox_common::ErrorKind;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// 环境能力要求
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapabilityRequirements {
    pub required_packages: Vec<String>,
    pub requires_accelerated_device: bool,
    pub required_model_paths: BTreeMap<String, PathBuf>,
}

/// 依赖检查结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencyReport {
    /// 是否可用
    pub available: bool,
    /// 不可用原因
    pub reason: Option<String>,
    /// 缺失项（只包含第一个失败类别）
    pub missing: Vec<String>,
    /// 失败类别
    pub kind: Option<ErrorKind>,
}

impl DependencyReport {
    pub fn satisfied() -> Self {
        Self {
            available: true,
            reason: None,
            missing: Vec::new(),
            kind: None,
        }
    }

    pub fn unavailable(kind: ErrorKind, reason: impl Into<String>, missing: Vec<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
            missing,
            kind: Some(kind),
        }
    }
}

/// 环境探测接口
pub trait EnvironmentProbe: Send + Sync {
    /// 依赖包是否可以在当前环境中解析
    fn package_available(&self, package: &str) -> bool;

    /// 设备运行时报告的加速设备数量
    fn accelerator_runtime_count(&self) -> usize;

    /// 通用硬件探测是否发现加速硬件
    fn hardware_reports_accelerator(&self) -> bool;

    /// 两项独立检查都通过才认为加速设备可用
    fn accelerator_available(&self) -> bool {
        self.accelerator_runtime_count() > 0 && self.hardware_reports_accelerator()
    }
}

/// 环境探测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// 强制指定加速设备是否可用，跳过实际探测
    pub accelerator_override: Option<bool>,
    /// 是否扫描设备节点
    pub probe_device_nodes: bool,
    /// 设备节点目录
    pub device_node_dir: String,
    /// 硬件探测目录
    pub hardware_probe_dir: String,
    /// 依赖包搜索路径
    pub package_search_paths: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        let package_search_paths = std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths)
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| p.to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            accelerator_override: None,
            probe_device_nodes: true,
            device_node_dir: "/dev".to_string(),
            hardware_probe_dir: "/proc/driver/nvidia/gpus".to_string(),
            package_search_paths,
        }
    }
}

/// 基于文件系统的环境探测
///
/// 设备运行时检查统计 `nvidia<N>` 设备节点并遵守 `CUDA_VISIBLE_DEVICES`，
/// 硬件检查读取驱动目录。两者结果在首次探测后缓存。
#[derive(Debug)]
pub struct SystemProbe {
    config: ProbeConfig,
    runtime_count: OnceCell<usize>,
    hardware: OnceCell<bool>,
}

impl SystemProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            runtime_count: OnceCell::new(),
            hardware: OnceCell::new(),
        }
    }

    fn count_device_nodes(&self) -> usize {
        if !self.config.probe_device_nodes {
            return 0;
        }

        let entries = match std::fs::read_dir(&self.config.device_node_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("无法读取设备节点目录 {}: {}", self.config.device_node_dir, e);
                return 0;
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix("nvidia"))
                    .is_some_and(|index| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
            })
            .count()
    }

    fn visible_device_limit() -> Option<usize> {
        let value = std::env::var("CUDA_VISIBLE_DEVICES").ok()?;
        let value = value.trim();
        if value.is_empty() || value == "-1" || value.eq_ignore_ascii_case("none") {
            return Some(0);
        }
        Some(value.split(',').filter(|id| !id.trim().is_empty()).count())
    }
}

impl EnvironmentProbe for SystemProbe {
    fn package_available(&self, package: &str) -> bool {
        let candidates = [
            package.to_string(),
            format!("lib{}.so", package),
            format!("lib{}.dylib", package),
            format!("{}.dll", package),
            format!("{}.exe", package),
        ];

        self.config.package_search_paths.iter().any(|dir| {
            let dir = Path::new(dir);
            candidates.iter().any(|candidate| dir.join(candidate).exists())
        })
    }

    fn accelerator_runtime_count(&self) -> usize {
        if let Some(forced) = self.config.accelerator_override {
            return usize::from(forced);
        }

        *self.runtime_count.get_or_init(|| {
            let nodes = self.count_device_nodes();
            match Self::visible_device_limit() {
                Some(limit) => nodes.min(limit),
                None => nodes,
            }
        })
    }

    fn hardware_reports_accelerator(&self) -> bool {
        if let Some(forced) = self.config.accelerator_override {
            return forced;
        }

        *self.hardware.get_or_init(|| {
            std::fs::read_dir(&self.config.hardware_probe_dir)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false)
        })
    }
}

/// 固定结果的环境探测
/// 适用于已经知道自身环境的宿主和测试
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    packages: HashSet<String>,
    runtime_accelerators: usize,
    hardware_accelerator: bool,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.packages.insert(package.into());
        self
    }

    /// 同时设置运行时和硬件检查结果
    pub fn with_accelerator(mut self, available: bool) -> Self {
        self.runtime_accelerators = usize::from(available);
        self.hardware_accelerator = available;
        self
    }

    pub fn with_runtime_accelerators(mut self, count: usize) -> Self {
        self.runtime_accelerators = count;
        self
    }

    pub fn with_hardware_accelerator(mut self, present: bool) -> Self {
        self.hardware_accelerator = present;
        self
    }
}

impl EnvironmentProbe for StaticProbe {
    fn package_available(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    fn accelerator_runtime_count(&self) -> usize {
        self.runtime_accelerators
    }

    fn hardware_reports_accelerator(&self) -> bool {
        self.hardware_accelerator
    }
}

/// 依赖解析器
#[derive(Clone)]
pub struct DependencyResolver {
    probe: Arc<dyn EnvironmentProbe>,
}

impl DependencyResolver {
    pub fn new(probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> Arc<dyn EnvironmentProbe> {
        self.probe.clone()
    }

    /// 检查能力要求
    ///
    /// 按 依赖包 -> 加速设备 -> 模型文件 的顺序检查，第一个失败的类别直接返回。
    pub async fn check(&self, requirements: &CapabilityRequirements) -> DependencyReport {
        let missing_packages: Vec<String> = requirements
            .required_packages
            .iter()
            .filter(|package| !self.probe.package_available(package))
            .cloned()
            .collect();

        if !missing_packages.is_empty() {
            let reason = format!("缺少依赖包: {}", missing_packages.join(", "));
            debug!("{}", reason);
            return DependencyReport::unavailable(
                ErrorKind::DependencyMissing,
                reason,
                missing_packages,
            );
        }

        if requirements.requires_accelerated_device {
            if let Some(reason) = self.check_accelerator() {
                debug!("{}", reason);
                return DependencyReport::unavailable(
                    ErrorKind::DeviceUnavailable,
                    reason,
                    vec!["accelerator".to_string()],
                );
            }
        }

        let mut missing_models = Vec::new();
        let mut problems = Vec::new();
        for (label, path) in &requirements.required_model_paths {
            if let Err(problem) = check_model_file(path).await {
                missing_models.push(label.clone());
                problems.push(format!("{} ({}): {}", label, path.display(), problem));
            }
        }

        if !missing_models.is_empty() {
            let reason = format!("模型文件不可用: {}", problems.join("; "));
            warn!("{}", reason);
            return DependencyReport::unavailable(
                ErrorKind::DependencyMissing,
                reason,
                missing_models,
            );
        }

        DependencyReport::satisfied()
    }

    fn check_accelerator(&self) -> Option<String> {
        let runtime_count = self.probe.accelerator_runtime_count();
        let hardware = self.probe.hardware_reports_accelerator();

        match (runtime_count > 0, hardware) {
            (true, true) => None,
            (false, false) => Some(
                "未检测到可用的加速设备 (accelerator): 设备运行时报告 0 个设备，硬件探测也未发现加速硬件"
                    .to_string(),
            ),
            (false, true) => Some(
                "加速设备不可用 (accelerator): 硬件探测发现加速硬件，但设备运行时报告 0 个可用设备，请检查驱动和运行时安装"
                    .to_string(),
            ),
            (true, false) => Some(format!(
                "加速设备检测结果不一致 (accelerator): 设备运行时报告 {} 个设备，但硬件探测未发现加速硬件",
                runtime_count
            )),
        }
    }
}

/// 检查模型文件：存在、是普通文件、非空、可以读取首字节
async fn check_model_file(path: &Path) -> Result<(), String> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err("文件不存在".to_string());
        }
        Err(e) => return Err(format!("无法读取文件信息: {}", e)),
    };

    if !metadata.is_file() {
        return Err("不是普通文件".to_string());
    }

    if metadata.len() == 0 {
        return Err("文件为空".to_string());
    }

    let mut file = fs::File::open(path)
        .await
        .map_err(|e| format!("无法打开文件: {}", e))?;
    let mut first = [0u8; 1];
    match file.read(&mut first).await {
        Ok(0) => Err("文件为空".to_string()),
        Ok(_) => Ok(()),
        Err(e) => Err(format!("无法读取文件: {}", e)),
    }
}
