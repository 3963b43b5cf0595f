// Plugin Sandbox Library
// 插件生命周期与沙箱执行注册表

pub mod config;
pub mod errors;
pub mod logging;
pub mod plugins;

pub use plugin_sandbox_common::{CommonError, Device, ErrorKind};
pub use plugins::{
    ExecutionOutcome, PluginManager, PluginManifest, PluginRegistry, PluginState,
};
